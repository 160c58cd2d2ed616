//! 通用常量与默认参数.

/// 单通道掩膜像素值.
pub mod mask {
    /// 二值掩膜中, 背景的像素值.
    pub const BACKGROUND: u8 = 0;

    /// 二值掩膜中, 前景的像素值.
    pub const FOREGROUND: u8 = 1;

    /// 真值掩膜与 ROI 光栅中, 前景的像素值 (单通道白色).
    pub const WHITE: u8 = 0b_1111_1111;

    /// 像素是否是前景?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p)
    }

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }
}

/// 默认物理缩放 (微米每像素).
pub const DEFAULT_SCALING: f64 = 3.45;

/// 默认白点 (12-bit 传感器饱和值).
pub const DEFAULT_WHITE_POINT: f32 = 4095.0;

/// 默认最大 ROI 物理半径 (微米).
pub const DEFAULT_MAX_RADIUS: f64 = 2500.0;

/// 默认归一化百分位.
pub const DEFAULT_NORM_PERCENTILE: f64 = 99.5;

/// 默认二值化阈值.
pub const DEFAULT_THRESHOLD_LEVEL: f32 = 1526.0;

/// 默认判稳所需的连续稳定轮询次数.
pub const DEFAULT_REQUIRED_STABLE: u32 = 3;

/// 默认轮询间隔 (毫秒).
pub const DEFAULT_CHECK_DELAY_MS: u64 = 200;

/// 默认轮询次数上限.
pub const DEFAULT_MAX_CHECKS: u32 = 10;

/// 默认真值掩膜中代表前景的像素值.
pub const DEFAULT_TRUTH_INTENSITY: u8 = mask::WHITE;

/// 贝叶斯阈值训练的直方图 bin 个数, 同时也是强度样本的取值上界.
pub const HIST_BINS: usize = 4096;

/// 距离变换保留内部像素的截断值.
pub const DIST_INTERIOR_CUT: f32 = 7.0;

/// 形态学结构元素的边长 (方形).
pub const KERNEL_SIDE: usize = 5;

/// 二类 k-means 的轮数上限.
pub const KMEANS_MAX_ITER: u32 = 10;

/// 二类 k-means 的收敛阈值 (两中心移动量之和).
pub const KMEANS_EPS: f32 = 1.0;
