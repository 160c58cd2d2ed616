//! 程序运行函数.

use fluo_berry::prelude::*;
use std::fs;
use std::io::{self, Write};
use std::time::Instant;
use utils::loader;

/// 训练模式: 汇聚训练集的前景/背景强度池, 打印建议阈值.
pub fn train() {
    let params = loader::params_from_env_or_home().expect("Loading run config error");
    let (raw_dir, truth_dir) = loader::train_dirs_from_env_or_home();
    assert!(
        raw_dir.is_dir(),
        "training directory `{}` is not a directory",
        raw_dir.display()
    );
    assert!(
        truth_dir.is_dir(),
        "truth directory `{}` is not a directory",
        truth_dir.display()
    );

    let decode = loader::plane_decoder(&params).expect("Resolving image codec error");
    let pairs = PairLoader::from_params(&params, &raw_dir, &truth_dir, decode)
        .expect("Scanning training directory error");
    assert!(!pairs.is_empty(), "Loading dataset config error");

    let cache = loader::pool_cache_from_env();
    let mut trainer = match cache.as_deref().filter(|p| p.is_file()) {
        Some(path) => {
            let blob = fs::read(path).expect("Reading pool cache error");
            let resumed = ThresholdTrainer::from_compact(&CompactPools::from_bytes(blob), &params)
                .expect("Decoding pool cache error");
            let (t, f) = resumed.pool_sizes();
            println!("Resuming from cached pools: {t} foreground / {f} background samples");
            resumed
        }
        None => ThresholdTrainer::new(&params),
    };

    let total = pairs.len();
    let begin = Instant::now();
    for (i, pair) in pairs.iter() {
        match pair {
            Ok(pair) => {
                trainer.update(&pair.scan, pair.truth.view());
                println!("Training {} Complete: {}/{total}", pair.scan.name(), i + 1);
            }
            Err(e) => eprintln!("Error training with {}: {e}", pairs.raw_path(i).display()),
        }
    }

    println!("Calculating...");
    match trainer.train_mt() {
        Ok(threshold) => println!("Suggested Threshold: {:.4}", threshold as f64),
        Err(e) => eprintln!("Error deriving threshold: {e}"),
    }

    if let Some(path) = cache {
        let pools = trainer.compress().expect("Encoding pool cache error");
        fs::write(&path, pools.as_bytes()).expect("Writing pool cache error");
        println!("Pools cached to `{}`", path.display());
    }
    println!("Total time: {:.4} sec", begin.elapsed().as_secs_f64());
}

/// 测试模式: 对测试集跑完整流水线 (或仅掩码阶段), 与真值比对并汇总报告.
pub fn test() {
    let params = loader::params_from_env_or_home().expect("Loading run config error");
    let (raw_dir, truth_dir) = loader::test_dirs_from_env_or_home();
    assert!(
        raw_dir.is_dir(),
        "testing directory `{}` is not a directory",
        raw_dir.display()
    );
    assert!(
        truth_dir.is_dir(),
        "truth directory `{}` is not a directory",
        truth_dir.display()
    );

    let decode = loader::plane_decoder(&params).expect("Resolving image codec error");
    let pairs = PairLoader::from_params(&params, &raw_dir, &truth_dir, decode)
        .expect("Scanning testing directory error");
    assert!(!pairs.is_empty(), "Loading dataset config error");

    let pipeline = RoiPipeline::from_params(&params);
    let mut tester = ThresholdTester::new(&params);
    let total = pairs.len();
    let begin = Instant::now();

    for (i, pair) in pairs.iter() {
        let pair = match pair {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Error testing with {}: {e}", pairs.raw_path(i).display());
                continue;
            }
        };
        let predicted = match tester.method() {
            TestMethod::Mask => pipeline.binary_mask(&pair.scan),
            TestMethod::Circle => match pipeline.process(&pair.scan) {
                Ok(result) => result.roi_mask(TestMethod::Circle),
                Err(e) => {
                    eprintln!("Error testing with {}: {e}", pair.scan.name());
                    continue;
                }
            },
        };
        let raw = pair.scan.array().expect("loaded pairs always carry pixels");
        tester.update(predicted.view(), pair.truth.view(), raw);
        println!("Testing {} Complete: {}/{total}", pair.scan.name(), i + 1);
    }

    let elapsed = begin.elapsed().as_secs_f64();
    {
        let mut out = io::stdout().lock();
        utils::sep_to(&mut out);
        match tester.report() {
            Ok(report) => report.describe_into(&mut out).expect("Writing report error"),
            Err(e) => eprintln!("Error deriving report: {e}"),
        }
        utils::sep_to(&mut out);
        out.flush().expect("Writing report error");
    }
    println!("Total time: {elapsed:.4} sec");
    println!("Average time per image: {:.4} sec", elapsed / total as f64);
}
