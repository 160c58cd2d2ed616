//! 前景分割: 全局阈值与二类 k-means.

use crate::consts::mask::{BACKGROUND, FOREGROUND};
use itertools::{Itertools, MinMaxResult};
use ndarray::{Array2, ArrayView2};

/// 全局阈值分割. 达到阈值的像素记前景.
pub(crate) fn threshold(img: ArrayView2<'_, f32>, level: f32) -> Array2<u8> {
    img.map(|&v| if v >= level { FOREGROUND } else { BACKGROUND })
}

/// 二类 k-means 分割, 较亮的一类记前景.
///
/// 以全局最小值与最大值作为初始中心, 交替执行指派与重估, 至多
/// `max_iter` 轮, 两中心的移动量之和小于 `eps` 时提前收敛.
/// 平面只有单一强度时没有可分的两类, 全部记背景.
pub(crate) fn kmeans_split(img: ArrayView2<'_, f32>, max_iter: u32, eps: f32) -> Array2<u8> {
    let (mut low, mut high) = match img.iter().copied().minmax() {
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
        _ => return Array2::from_elem(img.dim(), BACKGROUND),
    };
    if low == high {
        return Array2::from_elem(img.dim(), BACKGROUND);
    }

    for _ in 0..max_iter {
        let mut sum = [0.0f64; 2];
        let mut count = [0usize; 2];
        for &v in img.iter() {
            let k = usize::from((v - low).abs() > (v - high).abs());
            sum[k] += v as f64;
            count[k] += 1;
        }
        let next_low = if count[0] > 0 {
            (sum[0] / count[0] as f64) as f32
        } else {
            low
        };
        let next_high = if count[1] > 0 {
            (sum[1] / count[1] as f64) as f32
        } else {
            high
        };
        let moved = (next_low - low).abs() + (next_high - high).abs();
        low = next_low;
        high = next_high;
        if moved < eps {
            break;
        }
    }

    img.map(|&v| {
        if (v - high).abs() < (v - low).abs() {
            FOREGROUND
        } else {
            BACKGROUND
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_threshold_is_inclusive() {
        let img = array![[0.0f32, 1525.9], [1526.0, 4095.0]];
        let mask = threshold(img.view(), 1526.0);
        assert_eq!(mask, array![[BACKGROUND, BACKGROUND], [FOREGROUND, FOREGROUND]]);
    }

    #[test]
    fn test_kmeans_separates_bimodal_plane() {
        let img = array![
            [10.0f32, 12.0, 11.0, 200.0],
            [9.0, 10.0, 198.0, 202.0],
            [11.0, 10.0, 199.0, 201.0],
        ];
        let mask = kmeans_split(img.view(), 10, 1.0);
        for ((y, x), &v) in img.indexed_iter() {
            let want = if v > 100.0 { FOREGROUND } else { BACKGROUND };
            assert_eq!(mask[(y, x)], want, "pixel ({y}, {x})");
        }
    }

    #[test]
    fn test_kmeans_flat_plane_is_background() {
        let img = Array2::<f32>::from_elem((3, 3), 7.0);
        let mask = kmeans_split(img.view(), 10, 1.0);
        assert!(mask.iter().all(|&v| v == BACKGROUND));
    }
}
