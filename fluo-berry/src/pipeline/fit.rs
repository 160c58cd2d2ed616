//! 由清理后的前景掩码求外接圆参数.

use super::{contour, ellipse, morph, Circle, RegionError};
use crate::consts::mask::WHITE;
use crate::consts::DIST_INTERIOR_CUT;
use crate::params::FitMethod;
use ndarray::ArrayView2;

/// 按配置的拟合规则求圆.
///
/// 轮廓规则在掩码没有可用区域时报错; 特征值规则从不报错, 空掩码给出
/// [`Circle::VACANT`], 其圆内均值自然为零.
pub(crate) fn fit_circle(
    method: FitMethod,
    cleaned: ArrayView2<'_, u8>,
    radius_cap: f64,
) -> Result<Circle, RegionError> {
    match method {
        FitMethod::Contour => by_contour(cleaned, radius_cap),
        FitMethod::Eigenvalue => Ok(by_eigenvalue(cleaned, radius_cap)),
    }
}

/// 轮廓规则: 距离变换深于 [`DIST_INTERIOR_CUT`] 的内核区域取最大连通块,
/// 对其外边界做椭圆拟合, 半短轴作半径.
fn by_contour(cleaned: ArrayView2<'_, u8>, radius_cap: f64) -> Result<Circle, RegionError> {
    let dist = morph::chamfer_l2(cleaned);
    let core = dist.map(|&d| if d > DIST_INTERIOR_CUT { WHITE } else { 0 });
    let core = morph::close(morph::open(core.view()).view());

    let region = contour::largest_component(core.view()).ok_or(RegionError::NoRegionFound)?;
    let boundary = contour::boundary_of(&region, core.dim());
    let geom = ellipse::fit_ellipse(&boundary).ok_or(RegionError::DegenerateFit)?;

    Ok(Circle {
        center: geom.center,
        radius: geom.axes.1.min(radius_cap),
    })
}

/// 特征值规则: 前景坐标的协方差主轴给出半径, 逐坐标上中位数给出圆心.
fn by_eigenvalue(cleaned: ArrayView2<'_, u8>, radius_cap: f64) -> Circle {
    let mut ys: Vec<usize> = Vec::new();
    let mut xs: Vec<usize> = Vec::new();
    for ((y, x), &v) in cleaned.indexed_iter() {
        if v != 0 {
            ys.push(y);
            xs.push(x);
        }
    }
    let n = ys.len();
    if n < 2 {
        return Circle::VACANT;
    }

    let mid = n / 2;
    let center_y = *ys.select_nth_unstable(mid).1;
    let center_x = *xs.select_nth_unstable(mid).1;

    let mean_y = ys.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mean_x = xs.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mut syy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dy = ys[i] as f64 - mean_y;
        let dx = xs[i] as f64 - mean_x;
        syy += dy * dy;
        sxx += dx * dx;
        sxy += dy * dx;
    }
    let ddof = (n - 1) as f64;
    let (syy, sxx, sxy) = (syy / ddof, sxx / ddof, sxy / ddof);

    let half_sum = (syy + sxx) * 0.5;
    let half_gap = (((syy - sxx) * 0.5).powi(2) + sxy * sxy).sqrt();
    let lambda_min = (half_sum - half_gap).max(0.0);

    Circle {
        center: (center_y as f64, center_x as f64),
        radius: (2.0 * lambda_min.sqrt()).min(radius_cap),
    }
}
