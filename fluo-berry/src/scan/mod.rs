//! 荧光扫描图像及其两条构造路径.
//!
//! 扫描来自监视目录下尚在写入的容器文件, 所以构造器先做稳定性轮询,
//! 判稳后才解码像素. 轮询失败不是错误: 得到的扫描 `array()` 为空,
//! 由队列层决定跳过还是保留.

mod meta;
mod stable;

pub use stable::{stable_read, PollPlan};

use ndarray::{Array2, ArrayD, ArrayView2};
use num::ToPrimitive;
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// 构造扫描时的单文件错误.
///
/// 稳定性轮询失败不在此列 (见模块级说明); 这里只收容器内容本身的问题.
#[derive(Debug)]
pub enum SourceError {
    /// 内嵌元数据缺失或无法解析.
    Metadata(PathBuf),

    /// 像素数据已解码但无法压缩为二维强度平面, 或容器本身损坏.
    Format(PathBuf),
}

impl SourceError {
    /// 获取出错文件的路径.
    #[inline]
    pub fn path(&self) -> &Path {
        match self {
            Self::Metadata(p) | Self::Format(p) => p,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata(_) => f.write_str("embedded metadata missing or unparsable"),
            Self::Format(_) => f.write_str("pixel data does not reduce to a 2-D intensity plane"),
        }
    }
}

impl std::error::Error for SourceError {}

/// 一幅荧光扫描: 强度平面加上解读它所需的标定元数据.
///
/// 元数据有两个来源, 对应两条构造路径:
///
/// 1. [`FluorScan::with_embedded_meta`]: 缩放与白点刮取自容器内嵌的 XML;
/// 2. [`FluorScan::with_fixed_meta`]: 由调用方配置统一提供.
///
/// 两条路径产出完全相同的类型, 下游流水线不区分来源.
#[derive(Clone, Debug)]
pub struct FluorScan {
    path: PathBuf,
    array: Option<Array2<f32>>,
    scaling: f64,
    white_point: f32,
}

impl FluorScan {
    /// 内嵌元数据构造. `decode` 解码像素数组, `read_meta` 读出 XML 文档.
    ///
    /// 元数据总是被刮取, 即便像素尚未判稳; 刮取失败立即报
    /// [`SourceError::Metadata`]. 像素判稳后若带有多余的非单位轴, 报
    /// [`SourceError::Format`].
    pub fn with_embedded_meta<P, F, M>(
        path: P,
        decode: F,
        read_meta: M,
        plan: &PollPlan,
    ) -> Result<Self, SourceError>
    where
        P: AsRef<Path>,
        F: FnOnce(&Path) -> io::Result<ArrayD<f32>>,
        M: FnOnce(&Path) -> io::Result<String>,
    {
        let path = path.as_ref().to_path_buf();
        let raw = match stable_read(&path, decode, plan) {
            Ok(opt) => opt,
            Err(_) => return Err(SourceError::Format(path)),
        };
        let doc = match read_meta(&path) {
            Ok(doc) => doc,
            Err(_) => return Err(SourceError::Metadata(path)),
        };
        let Some(found) = meta::scrape_embedded(&doc) else {
            return Err(SourceError::Metadata(path));
        };
        let array = match raw {
            Some(nd) => match meta::reduce_to_plane(nd) {
                Some(plane) => Some(plane),
                None => return Err(SourceError::Format(path)),
            },
            None => None,
        };
        Ok(Self {
            path,
            array,
            scaling: found.scaling,
            white_point: found.white_point,
        })
    }

    /// 固定元数据构造: 缩放与白点来自调用方, 解码器直接产出二维平面.
    pub fn with_fixed_meta<P, F>(
        path: P,
        decode: F,
        scaling: f64,
        white_point: f32,
        plan: &PollPlan,
    ) -> Result<Self, SourceError>
    where
        P: AsRef<Path>,
        F: FnOnce(&Path) -> io::Result<Array2<f32>>,
    {
        let path = path.as_ref().to_path_buf();
        let array = match stable_read(&path, decode, plan) {
            Ok(opt) => opt,
            Err(_) => return Err(SourceError::Format(path)),
        };
        Ok(Self {
            path,
            array,
            scaling,
            white_point,
        })
    }

    /// 由现成的强度平面构造, 不做任何轮询. 标定数据集走这条路.
    pub fn from_array<P: AsRef<Path>>(
        path: P,
        array: Array2<f32>,
        scaling: f64,
        white_point: f32,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            array: Some(array),
            scaling,
            white_point,
        }
    }

    /// 像素尚未就绪的占位扫描.
    pub fn pending<P: AsRef<Path>>(path: P, scaling: f64, white_point: f32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            array: None,
            scaling,
            white_point,
        }
    }

    /// 获取强度平面视图. 稳定性轮询失败的扫描返回 `None`.
    #[inline]
    pub fn array(&self) -> Option<ArrayView2<'_, f32>> {
        self.array.as_ref().map(|a| a.view())
    }

    /// 判断像素是否已就绪.
    #[inline]
    pub fn has_array(&self) -> bool {
        self.array.is_some()
    }

    /// 获取每像素的物理尺寸 (微米).
    #[inline]
    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// 获取相机像素饱和值.
    #[inline]
    pub fn white_point(&self) -> f32 {
        self.white_point
    }

    /// 获取来源路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 获取不含目录的文件名, 用于输出行与错误信息.
    pub fn name(&self) -> Cow<'_, str> {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    }
}

/// 把任意数值类型的二维数组转换为 `f32` 强度平面. 无法转换的元素记 0.
pub fn plane_from<T: ToPrimitive>(src: &Array2<T>) -> Array2<f32> {
    src.map(|v| v.to_f32().unwrap_or(0.0))
}
