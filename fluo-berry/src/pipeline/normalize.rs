//! 百分位归一化.

use ndarray::{Array2, ArrayView2};
use ordered_float::NotNan;

/// 求样本的线性插值百分位数. NaN 元素被忽略; 没有可用样本时返回 `None`.
pub(crate) fn percentile_of(values: &[f32], pct: f64) -> Option<f32> {
    let mut sorted: Vec<NotNan<f32>> = values
        .iter()
        .copied()
        .filter_map(|v| NotNan::new(v).ok())
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable();

    let pos = (sorted.len() - 1) as f64 * (pct / 100.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let lower = sorted[lo].into_inner() as f64;
    let upper = sorted[hi.min(sorted.len() - 1)].into_inner() as f64;
    Some((lower + (upper - lower) * (pos - lo as f64)) as f32)
}

/// 把强度平面按百分位上界线性拉伸到白点.
///
/// 上界以下线性缩放, 上界以上钳到白点. 上界不为正时 (全黑平面) 跳过
/// 缩放, 直接返回按白点钳制的副本.
pub(crate) fn stretch(img: ArrayView2<'_, f32>, white_point: f32, pct: f64) -> Array2<f32> {
    let flat: Vec<f32> = img.iter().copied().collect();
    let ubound = percentile_of(&flat, pct).unwrap_or(0.0);
    if ubound <= 0.0 {
        return img.map(|&v| v.min(white_point));
    }
    let gain = white_point / ubound;
    img.map(|&v| (v * gain).min(white_point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_percentile_interpolates() {
        let v: Vec<f32> = (0..=100).map(|i| i as f32).collect();
        assert_eq!(percentile_of(&v, 50.0), Some(50.0));
        assert_eq!(percentile_of(&v, 99.5), Some(99.5));
        assert_eq!(percentile_of(&[0.0, 10.0], 25.0), Some(2.5));
        assert_eq!(percentile_of(&[], 50.0), None);
    }

    #[test]
    fn test_stretch_reaches_white_point() {
        let img = array![[0.0f32, 5.0], [10.0, 10.0]];
        let out = stretch(img.view(), 4095.0, 100.0);
        assert_eq!(out[(0, 0)], 0.0);
        assert_eq!(out[(0, 1)], 4095.0 * 0.5);
        assert_eq!(out[(1, 0)], 4095.0);
    }

    #[test]
    fn test_stretch_clamps_above_ubound() {
        // 百分位 50 的上界是 10, 更亮的离群值被钳到白点.
        let img = array![[10.0f32, 10.0], [10.0, 400.0]];
        let out = stretch(img.view(), 100.0, 50.0);
        assert_eq!(out[(0, 0)], 100.0);
        assert_eq!(out[(1, 1)], 100.0);
    }

    #[test]
    fn test_stretch_skips_dark_plane() {
        let img = Array2::<f32>::zeros((4, 4));
        let out = stretch(img.view(), 4095.0, 99.5);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
