//! 程序运行函数.

use crate::report::{OverlayWriter, RowWriter};
use fluo_berry::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use utils::loader;

/// 队列空转时的休眠间隔.
const IDLE: Duration = Duration::from_millis(200);

/// 批处理: 清空监视目录的既有文件后退出.
pub fn run_batch() {
    let (params, watch_dir, mut rows, overlay) = bootstrap();
    let factory = loader::scan_factory(&params).expect("Resolving image codec error");
    let mut queue = IngestQueue::new(
        &watch_dir,
        &params.image_format,
        Materialize::Lazy,
        true,
        factory,
    )
    .expect("Scanning watch directory error");
    let pipeline = RoiPipeline::from_params(&params);

    let to_process = queue.len();
    println!(
        "Processing backlog of {to_process} files under `{}`",
        queue.dir().display()
    );
    utils::sep();

    let begin = Instant::now();
    let mut count = 1usize;
    while !queue.is_empty() {
        if let Some(front) = queue.front() {
            let scan = front.into_owned();
            queue.dequeue();
            match pipeline.process(&scan) {
                Ok(result) => {
                    rows.write_row(&scan, &result).expect("Writing csv row error");
                    println!(
                        "{count}/{to_process} - {}: {:.3}",
                        scan.name(),
                        result.mean_fluorescence
                    );
                    write_overlay(overlay.as_ref(), &scan, &result);
                }
                Err(e) => eprintln!("Error processing {}: {e}", scan.name()),
            }
            count += 1;
        }
        report_faults(&mut queue);
    }
    rows.flush().expect("Writing csv error");

    let elapsed = begin.elapsed().as_secs_f64();
    utils::sep();
    println!("Results saved to `{}`", rows.path().display());
    println!("Total time: {elapsed:.4} sec");
    if to_process > 0 {
        println!(
            "Average time per image: {:.4} sec",
            elapsed / to_process as f64
        );
    }
}

/// 实时监视: 反复重扫目录, 协作式停机.
pub fn run_live() {
    let (params, watch_dir, mut rows, overlay) = bootstrap();
    let factory = loader::scan_factory(&params).expect("Resolving image codec error");
    let mut queue = IngestQueue::new(
        &watch_dir,
        &params.image_format,
        params.materialize,
        params.enqueue_existing,
        factory,
    )
    .expect("Scanning watch directory error");
    let pipeline = RoiPipeline::from_params(&params);

    let stop = utils::stdin_stop_flag();
    println!(
        "Watching `{}`. Press `q` then Enter to stop.",
        queue.dir().display()
    );
    utils::sep();

    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = queue.update() {
            eprintln!("Error scanning `{}`: {e}", queue.dir().display());
            thread::sleep(IDLE);
            continue;
        }
        match queue.front().map(|front| front.into_owned()) {
            Some(scan) => {
                queue.dequeue();
                match pipeline.process(&scan) {
                    Ok(result) => {
                        rows.write_row(&scan, &result).expect("Writing csv row error");
                        rows.flush().expect("Writing csv error");
                        println!("{}: {:.3}", scan.name(), result.mean_fluorescence);
                        write_overlay(overlay.as_ref(), &scan, &result);
                    }
                    Err(e) => eprintln!("Error processing {}: {e}", scan.name()),
                }
            }
            None => thread::sleep(IDLE),
        }
        report_faults(&mut queue);
    }
    println!("Stopped. Results saved to `{}`", rows.path().display());
}

/// 解析配置与目录, 准备结果落盘器.
fn bootstrap() -> (Params, PathBuf, RowWriter, Option<OverlayWriter>) {
    let params = loader::params_from_env_or_home().expect("Loading run config error");
    let watch_dir = loader::watch_dir_from_env_or_home();
    assert!(
        watch_dir.is_dir(),
        "watch directory `{}` is not a directory",
        watch_dir.display()
    );

    let out_dir = loader::output_dir_from_env_or_home();
    std::fs::create_dir_all(&out_dir).expect("Creating output directory error");
    let rows = RowWriter::create(&out_dir).expect("Creating csv writer error");
    let overlay = loader::write_roi_from_env().then(|| OverlayWriter::new(&out_dir));
    (params, watch_dir, rows, overlay)
}

fn write_overlay(writer: Option<&OverlayWriter>, scan: &FluorScan, result: &ProcessingResult) {
    if let Some(w) = writer {
        if let Err(e) = w.write_roi(scan, result) {
            eprintln!("Error writing overlay for {}: {e}", scan.name());
        }
    }
}

/// 把队列积累的单文件故障转发到标准错误.
fn report_faults<F>(queue: &mut IngestQueue<F>)
where
    F: Fn(&Path) -> Result<FluorScan, SourceError>,
{
    for fault in queue.take_faults() {
        eprintln!("Error processing {fault}");
    }
}

