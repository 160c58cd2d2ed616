//! 标定数据集: 原始扫描与真值掩码的配对加载.

use crate::params::Params;
use crate::scan::{plane_from, FluorScan};
use crate::Idx2d;
use image::DynamicImage;
use ndarray::Array2;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

/// 一对标注样本.
#[derive(Clone, Debug)]
pub struct LabeledPair {
    /// 原始扫描, 像素一定已就绪.
    pub scan: FluorScan,

    /// 与扫描同形的真值掩码.
    pub truth: Array2<u8>,
}

/// 成对数据集加载器.
///
/// 原始目录按配置的扩展名收集扫描文件 (字典序), 真值目录存放同词干的
/// png 掩码文件. 加载是惰性的: 迭代器逐对产出 `(下标, 加载结果)`, 单对
/// 样本的失败不影响其余样本.
pub struct PairLoader<F> {
    raws: Vec<PathBuf>,
    truth_dir: PathBuf,
    scaling: f64,
    white_point: f32,
    decode: F,
}

impl<F> PairLoader<F>
where
    F: Fn(&Path) -> io::Result<Array2<f32>>,
{
    /// 扫描原始目录并构造加载器. 扫描的标定元数据统一取自配置.
    pub fn from_params<P, Q>(
        params: &Params,
        raw_dir: P,
        truth_dir: Q,
        decode: F,
    ) -> io::Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let format = params
            .image_format
            .trim_start_matches('.')
            .to_ascii_lowercase();
        let mut raws = Vec::new();
        for entry in std::fs::read_dir(raw_dir.as_ref())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&format))
            {
                raws.push(path);
            }
        }
        raws.sort();
        Ok(Self {
            raws,
            truth_dir: truth_dir.as_ref().to_path_buf(),
            scaling: params.scaling,
            white_point: params.white_point,
            decode,
        })
    }

    /// 获取样本对数.
    #[inline]
    pub fn len(&self) -> usize {
        self.raws.len()
    }

    /// 判断数据集是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raws.is_empty()
    }

    /// 获取第 `index` 个原始文件路径. 下标越界则程序 panic.
    #[inline]
    pub fn raw_path(&self, index: usize) -> &Path {
        &self.raws[index]
    }

    /// 第 `index` 对样本的真值文件路径: 真值目录下同词干的 png 掩码.
    pub fn truth_path(&self, index: usize) -> PathBuf {
        let name = self.raws[index]
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_default();
        self.truth_dir.join(name).with_extension("png")
    }

    /// 加载第 `index` 对样本. 下标越界则程序 panic.
    ///
    /// 扫描与真值形状不一致按数据损坏报错.
    pub fn load(&self, index: usize) -> io::Result<LabeledPair> {
        let raw_path = &self.raws[index];
        let plane = (self.decode)(raw_path)?;
        let truth = decode_truth(self.truth_path(index))?;
        if plane.dim() != truth.dim() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "truth shape {:?} does not match scan shape {:?}",
                    truth.dim(),
                    plane.dim()
                ),
            ));
        }
        Ok(LabeledPair {
            scan: FluorScan::from_array(raw_path, plane, self.scaling, self.white_point),
            truth,
        })
    }

    /// 逐对迭代, 产出 `(下标, 加载结果)`.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (usize, io::Result<LabeledPair>)> + '_ {
        (0..self.raws.len()).map(move |i| (i, self.load(i)))
    }
}

/// 用 `image` 解码 8/16 位灰度容器为强度平面, 像素保持原生取值.
pub fn decode_gray<P: AsRef<Path>>(path: P) -> io::Result<Array2<f32>> {
    let img = image::open(path.as_ref()).map_err(to_invalid_data)?;
    match img {
        DynamicImage::ImageLuma8(buf) => {
            let (w, h) = buf.dimensions();
            let native = to_array((h as usize, w as usize), buf.into_raw())?;
            Ok(plane_from(&native))
        }
        other => {
            let buf = other.to_luma16();
            let (w, h) = buf.dimensions();
            let native = to_array((h as usize, w as usize), buf.into_raw())?;
            Ok(plane_from(&native))
        }
    }
}

/// 解码真值掩码为 8 位平面.
pub fn decode_truth<P: AsRef<Path>>(path: P) -> io::Result<Array2<u8>> {
    let buf = image::open(path.as_ref()).map_err(to_invalid_data)?.to_luma8();
    let (w, h) = buf.dimensions();
    to_array((h as usize, w as usize), buf.into_raw())
}

/// 解码存放 `f32` 平面的 `.npy` 文件.
pub fn decode_npy<P: AsRef<Path>>(path: P) -> io::Result<Array2<f32>> {
    ndarray_npy::read_npy(path.as_ref()).map_err(to_invalid_data)
}

/// 获取 `{用户主目录}/.fluo-berry` 目录下给定继续项组成的全路径.
pub fn home_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push(".fluo-berry");
    ans.extend(it);
    Some(ans)
}

/// 默认数据集根目录 `~/.fluo-berry/datasets`.
pub fn default_pair_root() -> Option<PathBuf> {
    home_dir_with(["datasets"])
}

fn to_array<T>(dim: Idx2d, data: Vec<T>) -> io::Result<Array2<T>> {
    Array2::from_shape_vec(dim, data).map_err(to_invalid_data)
}

fn to_invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
