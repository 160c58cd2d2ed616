//! 运行参数快照.
//!
//! 核心库只消费一份经过校验、运行期不可变的参数快照. 配置文件的解析与持久化
//! 由外层驱动负责; 驱动在进入处理循环之前必须调用 [`Params::validate`],
//! 校验失败属于致命错误, 不应开始处理任何文件.

use crate::consts;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 二值化策略选择.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MaskMethod {
    /// 固定阈值: 达到给定强度的像素为前景.
    Threshold,

    /// 对展平强度做无监督 2-means 聚类, 均值较高的簇为前景.
    KMeans,
}

/// 圆形 ROI 拟合策略选择.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitMethod {
    /// 距离变换 + 最大连通区域外轮廓 + 椭圆拟合.
    Contour,

    /// 前景坐标中位数定心 + 协方差最小特征值估半径.
    Eigenvalue,
}

/// 贝叶斯测试时与真值比较的预测对象.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TestMethod {
    /// 完整管线拟合的圆形 ROI 光栅.
    Circle,

    /// 仅二值化 (含形态学清理) 输出的掩膜.
    Mask,
}

/// 入队物化策略.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Materialize {
    /// 只存文件名, `front()` 时重新解码.
    Lazy,

    /// 入队时立即解码并保存解码结果.
    Eager,
}

/// 单项参数约束违例.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamFault {
    /// 图像格式后缀为空.
    EmptyFormat,

    /// 物理缩放非正.
    NonPositiveScaling(f64),

    /// 白点非正.
    NonPositiveWhitePoint(f32),

    /// 最大 ROI 半径非正.
    NonPositiveMaxRadius(f64),

    /// 归一化百分位不在 `(0, 100]` 内.
    PercentileOutOfRange(f64),

    /// 二值化阈值为负或非有限.
    BadThresholdLevel(f32),

    /// 判稳所需连续稳定次数为零.
    ZeroRequiredStable,

    /// 轮询间隔为零.
    ZeroCheckDelay,

    /// 轮询次数上限为零.
    ZeroMaxChecks,

    /// 真值前景强度为零, 无法与背景区分.
    ZeroTruthIntensity,
}

impl fmt::Display for ParamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFormat => write!(f, "image format suffix must not be empty"),
            Self::NonPositiveScaling(v) => {
                write!(f, "image scaling must be positive (got {v})")
            }
            Self::NonPositiveWhitePoint(v) => {
                write!(f, "image white point must be positive (got {v})")
            }
            Self::NonPositiveMaxRadius(v) => {
                write!(f, "maximum ROI radius must be positive (got {v})")
            }
            Self::PercentileOutOfRange(v) => {
                write!(f, "normalization percentile must be in (0, 100] (got {v})")
            }
            Self::BadThresholdLevel(v) => {
                write!(f, "threshold intensity must be finite and non-negative (got {v})")
            }
            Self::ZeroRequiredStable => write!(f, "stability checks must be at least 1"),
            Self::ZeroCheckDelay => write!(f, "delay between stability checks must be positive"),
            Self::ZeroMaxChecks => write!(f, "maximum stability checks must be at least 1"),
            Self::ZeroTruthIntensity => write!(f, "truth intensity must be non-zero"),
        }
    }
}

/// 参数校验错误. 聚合一次校验发现的所有约束违例.
#[derive(Clone, Debug)]
pub struct ParamError {
    faults: Vec<ParamFault>,
}

impl ParamError {
    /// 所有违例.
    #[inline]
    pub fn faults(&self) -> &[ParamFault] {
        &self.faults
    }
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid parameters: ")?;
        for (i, fault) in self.faults.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{fault}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParamError {}

/// 一次运行的全部参数.
///
/// 字段语义见各字段文档. 该结构在进入处理循环前构造一次, 之后不再修改.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Params {
    /// 图像文件后缀 (不带点, 大小写不敏感). `czi` 代表内嵌元数据容器,
    /// 其余后缀按固定元数据处理.
    pub image_format: String,

    /// 物理缩放, 微米每像素. 仅固定元数据格式使用.
    pub scaling: f64,

    /// 白点 (饱和强度). 仅固定元数据格式使用.
    pub white_point: f32,

    /// ROI 最大物理半径 (微米). 像素半径上限为 `max_radius / scaling`.
    pub max_radius: f64,

    /// 是否启用百分位归一化.
    pub normalization: bool,

    /// 归一化百分位, `(0, 100]`.
    pub normalization_percentile: f64,

    /// 二值化策略.
    pub masking_method: MaskMethod,

    /// [`MaskMethod::Threshold`] 使用的强度阈值.
    pub threshold_level: f32,

    /// ROI 拟合策略.
    pub radius_method: FitMethod,

    /// 判稳所需的连续稳定轮询次数.
    pub required_stable: u32,

    /// 相邻两次轮询的间隔 (毫秒).
    pub check_delay_ms: u64,

    /// 放弃前的轮询次数上限.
    pub max_checks: u32,

    /// 真值掩膜中代表前景的像素值.
    pub truth_intensity: u8,

    /// 贝叶斯测试的预测对象.
    pub testing_method: TestMethod,

    /// 入队物化策略.
    pub materialize: Materialize,

    /// 构造队列时是否把目录中已存在的文件入队 (批处理模式),
    /// 否则仅标记为已见 (实时模式).
    pub enqueue_existing: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            image_format: "czi".to_string(),
            scaling: consts::DEFAULT_SCALING,
            white_point: consts::DEFAULT_WHITE_POINT,
            max_radius: consts::DEFAULT_MAX_RADIUS,
            normalization: true,
            normalization_percentile: consts::DEFAULT_NORM_PERCENTILE,
            masking_method: MaskMethod::Threshold,
            threshold_level: consts::DEFAULT_THRESHOLD_LEVEL,
            radius_method: FitMethod::Contour,
            required_stable: consts::DEFAULT_REQUIRED_STABLE,
            check_delay_ms: consts::DEFAULT_CHECK_DELAY_MS,
            max_checks: consts::DEFAULT_MAX_CHECKS,
            truth_intensity: consts::DEFAULT_TRUTH_INTENSITY,
            testing_method: TestMethod::Circle,
            materialize: Materialize::Lazy,
            enqueue_existing: false,
        }
    }
}

impl Params {
    /// 校验所有数值约束. 一次性返回全部违例.
    pub fn validate(&self) -> Result<(), ParamError> {
        let mut faults = Vec::new();
        if self.image_format.is_empty() {
            faults.push(ParamFault::EmptyFormat);
        }
        if !(self.scaling > 0.0) {
            faults.push(ParamFault::NonPositiveScaling(self.scaling));
        }
        if !(self.white_point > 0.0) {
            faults.push(ParamFault::NonPositiveWhitePoint(self.white_point));
        }
        if !(self.max_radius > 0.0) {
            faults.push(ParamFault::NonPositiveMaxRadius(self.max_radius));
        }
        if !(self.normalization_percentile > 0.0 && self.normalization_percentile <= 100.0) {
            faults.push(ParamFault::PercentileOutOfRange(self.normalization_percentile));
        }
        if !(self.threshold_level >= 0.0 && self.threshold_level.is_finite()) {
            faults.push(ParamFault::BadThresholdLevel(self.threshold_level));
        }
        if self.required_stable == 0 {
            faults.push(ParamFault::ZeroRequiredStable);
        }
        if self.check_delay_ms == 0 {
            faults.push(ParamFault::ZeroCheckDelay);
        }
        if self.max_checks == 0 {
            faults.push(ParamFault::ZeroMaxChecks);
        }
        if self.truth_intensity == 0 {
            faults.push(ParamFault::ZeroTruthIntensity);
        }

        if faults.is_empty() {
            Ok(())
        } else {
            Err(ParamError { faults })
        }
    }

    /// 图像格式是否为内嵌元数据容器.
    #[inline]
    pub fn embedded_meta(&self) -> bool {
        self.image_format.eq_ignore_ascii_case("czi")
    }

    /// 由稳定性参数构造轮询计划.
    #[inline]
    pub fn poll_plan(&self) -> crate::scan::PollPlan {
        crate::scan::PollPlan {
            max_checks: self.max_checks,
            delay: Duration::from_millis(self.check_delay_ms),
            required_stable: self.required_stable,
        }
    }

    /// ROI 像素半径上限, 即 `max_radius / scaling`.
    #[inline]
    pub fn radius_cap(&self) -> f64 {
        self.max_radius / self.scaling
    }
}
