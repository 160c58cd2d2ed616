//! 对 `fluo-berry` 配置与数据集路径的更一层封装. 提供更直接的运行配置加载.

use fluo_berry::dataset::{self, home_dir_with};
use fluo_berry::prelude::*;
use ndarray::Array2;
use std::env;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// 获取运行配置文件路径.
///
/// 1. 若环境变量 `$FLUO_PARAMS` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.fluo-berry/params.json`.
pub fn params_path_from_env_or_home() -> PathBuf {
    if let Ok(p) = env::var("FLUO_PARAMS") {
        PathBuf::from(p)
    } else {
        home_dir_with(["params.json"]).unwrap()
    }
}

/// 加载并校验运行配置. 文件不存在时回落到默认配置.
///
/// 配置为 json 快照; 缺失的键按默认值补齐, 违反约束的键整体报错.
pub fn load_params<P: AsRef<Path>>(path: P) -> io::Result<Params> {
    let params: Params = match fs::read_to_string(path.as_ref()) {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?,
        Err(e) if e.kind() == ErrorKind::NotFound => Params::default(),
        Err(e) => return Err(e),
    };
    params
        .validate()
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;
    Ok(params)
}

/// 从 `$FLUO_PARAMS` 或者 `$HOME/.fluo-berry/params.json` 加载运行配置.
#[inline]
pub fn params_from_env_or_home() -> io::Result<Params> {
    load_params(params_path_from_env_or_home())
}

/// 获取监视目录 (采集软件的写盘目录).
///
/// 1. 若环境变量 `$FLUO_WATCH_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.fluo-berry/incoming`.
pub fn watch_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("FLUO_WATCH_DIR") {
        PathBuf::from(d)
    } else {
        home_dir_with(["incoming"]).unwrap()
    }
}

/// 获取结果输出目录.
///
/// 1. 若环境变量 `$FLUO_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.fluo-berry/output`.
pub fn output_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("FLUO_OUTPUT_DIR") {
        PathBuf::from(d)
    } else {
        home_dir_with(["output"]).unwrap()
    }
}

/// 获取训练集原始/真值目录.
///
/// 1. 若环境变量 `$FLUO_TRAIN_RAW_DIR` 与 `$FLUO_TRAIN_TRUTH_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.fluo-berry/datasets/train` 下的 `raw` 与 `truth`.
pub fn train_dirs_from_env_or_home() -> (PathBuf, PathBuf) {
    pair_dirs("FLUO_TRAIN_RAW_DIR", "FLUO_TRAIN_TRUTH_DIR", "train")
}

/// 获取测试集原始/真值目录.
///
/// 1. 若环境变量 `$FLUO_TEST_RAW_DIR` 与 `$FLUO_TEST_TRUTH_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/.fluo-berry/datasets/test` 下的 `raw` 与 `truth`.
pub fn test_dirs_from_env_or_home() -> (PathBuf, PathBuf) {
    pair_dirs("FLUO_TEST_RAW_DIR", "FLUO_TEST_TRUTH_DIR", "test")
}

fn pair_dirs(raw_key: &str, truth_key: &str, split: &str) -> (PathBuf, PathBuf) {
    let raw = if let Ok(d) = env::var(raw_key) {
        PathBuf::from(d)
    } else {
        home_dir_with(["datasets", split, "raw"]).unwrap()
    };
    let truth = if let Ok(d) = env::var(truth_key) {
        PathBuf::from(d)
    } else {
        home_dir_with(["datasets", split, "truth"]).unwrap()
    };
    (raw, truth)
}

/// 样本池缓存路径, 由 `$FLUO_POOL_CACHE` 指定. 未设置则不缓存.
pub fn pool_cache_from_env() -> Option<PathBuf> {
    env::var("FLUO_POOL_CACHE")
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

/// 判断是否落盘 ROI 叠加图, 由 `$FLUO_WRITE_ROI` 控制 (非空且非 `0`).
pub fn write_roi_from_env() -> bool {
    env::var("FLUO_WRITE_ROI").is_ok_and(|v| !v.is_empty() && v != "0")
}

/// 已链接的平面解码器.
#[derive(Copy, Clone)]
enum PlaneCodec {
    Gray,
    Npy,
}

impl PlaneCodec {
    /// 不认识或未链接的格式在启动时报错, 而不是等到第一个文件.
    fn of(format: &str) -> io::Result<Self> {
        let tag = format.trim_start_matches('.').to_ascii_lowercase();
        match tag.as_str() {
            "png" | "tif" | "tiff" => Ok(Self::Gray),
            "npy" => Ok(Self::Npy),
            "czi" => Err(io::Error::new(
                ErrorKind::Unsupported,
                "czi codec is not linked into this build",
            )),
            other => Err(io::Error::new(
                ErrorKind::Unsupported,
                format!("unrecognized image format `{other}`"),
            )),
        }
    }

    fn decode(self, path: &Path) -> io::Result<Array2<f32>> {
        match self {
            Self::Gray => dataset::decode_gray(path),
            Self::Npy => dataset::decode_npy(path),
        }
    }
}

/// 按配置的图像格式解析出平面解码器.
pub fn plane_decoder(params: &Params) -> io::Result<impl Fn(&Path) -> io::Result<Array2<f32>>> {
    let codec = PlaneCodec::of(&params.image_format)?;
    Ok(move |path: &Path| codec.decode(path))
}

/// 按配置构造扫描工厂: 稳定性轮询加固定标定元数据.
pub fn scan_factory(
    params: &Params,
) -> io::Result<impl Fn(&Path) -> Result<FluorScan, SourceError>> {
    let codec = PlaneCodec::of(&params.image_format)?;
    let plan = params.poll_plan();
    let scaling = params.scaling;
    let white_point = params.white_point;
    Ok(move |path: &Path| {
        FluorScan::with_fixed_meta(path, |p| codec.decode(p), scaling, white_point, &plan)
    })
}
