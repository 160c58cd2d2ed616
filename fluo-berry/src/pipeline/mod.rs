//! 图像到测量的 ROI 流水线.
//!
//! 流水线把一幅荧光扫描变成一条定量测量: 归一化, 前景分割, 形态学清理,
//! 圆拟合, 最后在原始像素上求圆内均值. 均值始终取自未归一化的原始平面,
//! 归一化只服务于分割.

mod contour;
mod ellipse;
mod fit;
mod mask;
mod morph;
mod normalize;

use crate::consts::mask::WHITE;
use crate::consts::{KMEANS_EPS, KMEANS_MAX_ITER};
use crate::params::{FitMethod, MaskMethod, Params, TestMethod};
use crate::scan::FluorScan;
use crate::Idx2d;
use ndarray::{Array2, ArrayView2};
use std::fmt;

/// 求圆失败.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionError {
    /// 掩码里没有任何可用的前景区域.
    NoRegionFound,

    /// 区域退化, 无法拟合椭圆.
    DegenerateFit,
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRegionFound => f.write_str("no usable foreground region in mask"),
            Self::DegenerateFit => f.write_str("region too degenerate to fit an ellipse"),
        }
    }
}

impl std::error::Error for RegionError {}

/// 圆形 ROI, 圆心坐标为 (行, 列).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Circle {
    /// 圆心.
    pub center: (f64, f64),

    /// 半径 (像素).
    pub radius: f64,
}

impl Circle {
    /// 不含任何像素的空圆.
    pub const VACANT: Self = Self {
        center: (-1.0, -1.0),
        radius: 0.0,
    };

    /// 判断像素 `(y, x)` 是否落在圆内 (含圆周).
    #[inline]
    pub fn contains(&self, y: usize, x: usize) -> bool {
        let dy = y as f64 - self.center.0;
        let dx = x as f64 - self.center.1;
        dy * dy + dx * dx <= self.radius * self.radius
    }
}

/// 单幅扫描的处理产物.
#[derive(Clone, Debug)]
pub struct ProcessingResult {
    /// 分割前是否做过归一化.
    pub normalized: bool,

    /// 原始强度平面的副本, 供叠加输出使用.
    pub writeable: Array2<f32>,

    /// 清理后的前景掩码, 取值 0 或 255.
    pub binary: Array2<u8>,

    /// 拟合出的圆形 ROI.
    pub circle: Circle,

    /// 圆内原始像素的平均荧光强度.
    pub mean_fluorescence: f64,
}

impl ProcessingResult {
    /// 按测试口径渲染预测前景: 圆口径渲染圆形 ROI, 掩码口径直接取
    /// 清理后的前景掩码.
    pub fn roi_mask(&self, method: TestMethod) -> Array2<u8> {
        match method {
            TestMethod::Circle => circular_roi(self.binary.dim(), self.circle),
            TestMethod::Mask => self.binary.clone(),
        }
    }
}

/// ROI 流水线: 一次配置, 对任意数量的扫描重复使用.
#[derive(Clone, Debug)]
pub struct RoiPipeline {
    normalization: bool,
    percentile: f64,
    mask_method: MaskMethod,
    threshold_level: f32,
    fit_method: FitMethod,
    max_radius: f64,
}

impl RoiPipeline {
    /// 从配置构造流水线.
    pub fn from_params(params: &Params) -> Self {
        Self {
            normalization: params.normalization,
            percentile: params.normalization_percentile,
            mask_method: params.masking_method,
            threshold_level: params.threshold_level,
            fit_method: params.radius_method,
            max_radius: params.max_radius,
        }
    }

    /// 拟合之前的全部分割阶段: 归一化, 前景掩码与形态学清理.
    /// 输出 0/255 前景掩码.
    ///
    /// 调用方保证扫描像素已就绪, 否则程序 panic.
    pub fn binary_mask(&self, scan: &FluorScan) -> Array2<u8> {
        let raw = match scan.array() {
            Some(view) => view,
            None => panic!("pixels of `{}` are not materialized", scan.name()),
        };

        let segmented_src = if self.normalization {
            normalize::stretch(raw, scan.white_point(), self.percentile)
        } else {
            raw.to_owned()
        };
        let rough = match self.mask_method {
            MaskMethod::Threshold => mask::threshold(segmented_src.view(), self.threshold_level),
            MaskMethod::KMeans => {
                mask::kmeans_split(segmented_src.view(), KMEANS_MAX_ITER, KMEANS_EPS)
            }
        };
        let lifted = rough.map(|&v| if v != 0 { WHITE } else { 0 });
        morph::close(morph::open(lifted.view()).view())
    }

    /// 处理一幅扫描.
    ///
    /// 调用方保证扫描像素已就绪, 否则程序 panic; 队列层已把未就绪的
    /// 扫描挡在了外面. 半径以 `max_radius / scaling` 为上限, 即物理
    /// 半径上限换算成的像素数.
    pub fn process(&self, scan: &FluorScan) -> Result<ProcessingResult, RegionError> {
        let raw = match scan.array() {
            Some(view) => view,
            None => panic!("pixels of `{}` are not materialized", scan.name()),
        };
        let cleaned = self.binary_mask(scan);

        let radius_cap = self.max_radius / scan.scaling();
        let circle = fit::fit_circle(self.fit_method, cleaned.view(), radius_cap)?;
        let mean = mean_in_circle(raw, circle);

        Ok(ProcessingResult {
            normalized: self.normalization,
            writeable: raw.to_owned(),
            binary: cleaned,
            circle,
            mean_fluorescence: mean,
        })
    }
}

/// 按百分位上界把强度平面线性拉伸到白点, 即流水线分割前的归一化口径.
/// 训练器在开启归一化时以同一口径吸收样本.
pub fn normalize_plane(img: ArrayView2<'_, f32>, white_point: f32, pct: f64) -> Array2<f32> {
    normalize::stretch(img, white_point, pct)
}

/// 圆内 (含圆周) 原始像素的平均强度. 圆不含任何像素时为 0.
pub fn mean_in_circle(img: ArrayView2<'_, f32>, circle: Circle) -> f64 {
    let (h, w) = img.dim();
    if h == 0 || w == 0 {
        return 0.0;
    }
    let y_lo = (circle.center.0 - circle.radius).floor().max(0.0);
    let y_hi = (circle.center.0 + circle.radius).ceil().min((h - 1) as f64);
    let x_lo = (circle.center.1 - circle.radius).floor().max(0.0);
    let x_hi = (circle.center.1 + circle.radius).ceil().min((w - 1) as f64);
    if y_hi < y_lo || x_hi < x_lo {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in y_lo as usize..=y_hi as usize {
        for x in x_lo as usize..=x_hi as usize {
            if circle.contains(y, x) {
                sum += f64::from(img[(y, x)]);
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// 渲染圆形 ROI 掩码: 圆内 255, 圆外 0.
pub fn circular_roi(dim: Idx2d, circle: Circle) -> Array2<u8> {
    Array2::from_shape_fn(dim, |(y, x)| if circle.contains(y, x) { WHITE } else { 0 })
}

/// 渲染叠加图: 原始平面按白点压到 8 位灰度, 再把圆周烧成纯白.
/// 圆周取欧氏距离与半径相差不超过 1 像素的环带.
pub fn overlay_u8(img: ArrayView2<'_, f32>, circle: Circle, white_point: f32) -> Array2<u8> {
    let gain = if white_point > 0.0 {
        255.0 / white_point
    } else {
        0.0
    };
    Array2::from_shape_fn(img.dim(), |(y, x)| {
        let dy = y as f64 - circle.center.0;
        let dx = x as f64 - circle.center.1;
        let dist = (dy * dy + dx * dx).sqrt();
        if circle.radius > 0.0 && (dist - circle.radius).abs() <= 1.0 {
            u8::MAX
        } else {
            (img[(y, x)] * gain).clamp(0.0, 255.0) as u8
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn disk_scan(dim: Idx2d, center: (usize, usize), r: f64, level: f32) -> FluorScan {
        let img = Array2::from_shape_fn(dim, |(y, x)| {
            let dy = y as f64 - center.0 as f64;
            let dx = x as f64 - center.1 as f64;
            if dy * dy + dx * dx <= r * r {
                level
            } else {
                0.0
            }
        });
        FluorScan::from_array("disk.czi", img, 3.45, 4095.0)
    }

    fn contour_pipeline() -> RoiPipeline {
        RoiPipeline::from_params(&Params::default())
    }

    fn eigen_pipeline() -> RoiPipeline {
        let mut p = Params::default();
        p.radius_method = FitMethod::Eigenvalue;
        RoiPipeline::from_params(&p)
    }

    #[test]
    fn test_contour_round_trip() {
        let scan = disk_scan((140, 140), (70, 64), 48.0, 3000.0);
        let out = contour_pipeline().process(&scan).unwrap();

        assert!(out.normalized);
        assert!((out.circle.center.0 - 70.0).abs() <= 1.0, "row {}", out.circle.center.0);
        assert!((out.circle.center.1 - 64.0).abs() <= 1.0, "col {}", out.circle.center.1);
        // 距离变换削去一圈, 拟合半径落在原盘之内.
        assert!((out.circle.radius - 40.5).abs() <= 2.0, "radius {}", out.circle.radius);
        // 圆整体落在亮盘内部, 均值就是盘面强度.
        assert!((out.mean_fluorescence - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn test_eigenvalue_round_trip() {
        let scan = disk_scan((110, 110), (50, 60), 30.0, 3000.0);
        let out = eigen_pipeline().process(&scan).unwrap();

        assert!((out.circle.center.0 - 50.0).abs() <= 1.0);
        assert!((out.circle.center.1 - 60.0).abs() <= 1.0);
        assert!((out.circle.radius - 30.0).abs() <= 1.5, "radius {}", out.circle.radius);
        assert!(out.mean_fluorescence > 2900.0 && out.mean_fluorescence <= 3000.0);
    }

    #[test]
    fn test_pipeline_is_shareable_across_threads() {
        use rayon::prelude::*;

        let pipeline = contour_pipeline();
        let scans: Vec<FluorScan> = (0..8)
            .map(|i| disk_scan((140, 140), (70, 64), 40.0 + i as f64, 3000.0))
            .collect();

        let serial: Vec<f64> = scans
            .iter()
            .map(|s| pipeline.process(s).unwrap().mean_fluorescence)
            .collect();
        let parallel: Vec<f64> = scans
            .par_iter()
            .map(|s| pipeline.process(s).unwrap().mean_fluorescence)
            .collect();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_all_dark_contour_reports_no_region() {
        let scan = FluorScan::from_array("dark.czi", Array2::zeros((32, 32)), 3.45, 4095.0);
        let err = contour_pipeline().process(&scan).unwrap_err();
        assert_eq!(err, RegionError::NoRegionFound);
    }

    #[test]
    fn test_all_dark_eigenvalue_reports_zero_mean() {
        let scan = FluorScan::from_array("dark.czi", Array2::zeros((32, 32)), 3.45, 4095.0);
        let out = eigen_pipeline().process(&scan).unwrap();
        assert_eq!(out.circle, Circle::VACANT);
        assert_eq!(out.mean_fluorescence, 0.0);
        assert!(out.binary.iter().all(|&v| v == 0));
    }

    #[test]
    #[should_panic(expected = "not materialized")]
    fn test_pending_scan_panics() {
        let scan = FluorScan::pending("pending.czi", 3.45, 4095.0);
        let _ = contour_pipeline().process(&scan);
    }

    #[test]
    fn test_mean_in_circle_counts_boundary() {
        let img = Array2::from_elem((5, 5), 2.0f32);
        let circle = Circle {
            center: (2.0, 2.0),
            radius: 0.0,
        };
        // 半径为零但圆心正落在像素上, 圆内只有这一个像素.
        assert_eq!(mean_in_circle(img.view(), circle), 2.0);
        assert_eq!(mean_in_circle(img.view(), Circle::VACANT), 0.0);
    }

    #[test]
    fn test_circular_roi_matches_contains() {
        let circle = Circle {
            center: (3.0, 4.0),
            radius: 2.5,
        };
        let roi = circular_roi((8, 8), circle);
        for ((y, x), &v) in roi.indexed_iter() {
            assert_eq!(v == WHITE, circle.contains(y, x));
        }
    }

    #[test]
    fn test_overlay_burns_ring() {
        let img = Array2::from_elem((16, 16), 2047.5f32);
        let circle = Circle {
            center: (8.0, 8.0),
            radius: 5.0,
        };
        let over = overlay_u8(img.view(), circle, 4095.0);
        // 圆周正上方的像素在环带里.
        assert_eq!(over[(3, 8)], u8::MAX);
        // 圆心处是按白点缩放的灰度.
        assert_eq!(over[(8, 8)], 127);
    }
}
