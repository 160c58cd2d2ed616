//! 方形结构元的灰度形态学与倒角距离变换.

use crate::consts::KERNEL_SIDE;
use ndarray::{Array2, ArrayView2};
use once_cell::sync::Lazy;

/// 结构元的像素偏移集合, 即边长 [`KERNEL_SIDE`] 的实心方块.
static KERNEL: Lazy<Vec<(isize, isize)>> = Lazy::new(|| {
    let reach = (KERNEL_SIDE / 2) as isize;
    let mut offsets = Vec::with_capacity(KERNEL_SIDE * KERNEL_SIDE);
    for dy in -reach..=reach {
        for dx in -reach..=reach {
            offsets.push((dy, dx));
        }
    }
    offsets
});

fn probe<F>(mask: ArrayView2<'_, u8>, seed: u8, fold: F) -> Array2<u8>
where
    F: Fn(u8, u8) -> u8,
{
    let (h, w) = mask.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        // 越界的结构元位置不参与聚合.
        let mut acc = seed;
        for &(dy, dx) in KERNEL.iter() {
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            if ny >= 0 && nx >= 0 && (ny as usize) < h && (nx as usize) < w {
                acc = fold(acc, mask[(ny as usize, nx as usize)]);
            }
        }
        acc
    })
}

/// 腐蚀: 结构元覆盖范围内的最小值.
pub(crate) fn erode(mask: ArrayView2<'_, u8>) -> Array2<u8> {
    probe(mask, u8::MAX, u8::min)
}

/// 膨胀: 结构元覆盖范围内的最大值.
pub(crate) fn dilate(mask: ArrayView2<'_, u8>) -> Array2<u8> {
    probe(mask, u8::MIN, u8::max)
}

/// 开运算 (先腐蚀后膨胀), 去掉小于结构元的亮斑.
pub(crate) fn open(mask: ArrayView2<'_, u8>) -> Array2<u8> {
    dilate(erode(mask).view())
}

/// 闭运算 (先膨胀后腐蚀), 填平小于结构元的暗孔.
pub(crate) fn close(mask: ArrayView2<'_, u8>) -> Array2<u8> {
    erode(dilate(mask).view())
}

/// 5x5 倒角权重: 正交 1, 对角 1.4, 马步 2.1969.
const CHAMFER_ORTH: f32 = 1.0;
const CHAMFER_DIAG: f32 = 1.4;
const CHAMFER_KNIGHT: f32 = 2.1969;

/// 前向扫描的邻域模板, 后向扫描取其中心对称.
const CHAMFER_FWD: [(isize, isize, f32); 8] = [
    (0, -1, CHAMFER_ORTH),
    (-1, 0, CHAMFER_ORTH),
    (-1, -1, CHAMFER_DIAG),
    (-1, 1, CHAMFER_DIAG),
    (-2, -1, CHAMFER_KNIGHT),
    (-2, 1, CHAMFER_KNIGHT),
    (-1, -2, CHAMFER_KNIGHT),
    (-1, 2, CHAMFER_KNIGHT),
];

/// 5x5 倒角模板的两趟欧氏距离变换近似.
///
/// 每个前景像素给出到最近背景像素的距离; 背景像素为 0.
/// 整幅平面没有背景时, 前景距离保持为 `f32::MAX`.
pub(crate) fn chamfer_l2(mask: ArrayView2<'_, u8>) -> Array2<f32> {
    let (h, w) = mask.dim();
    let mut dist = mask.map(|&v| if v == 0 { 0.0f32 } else { f32::MAX });

    let relax = |dist: &mut Array2<f32>, y: usize, x: usize, flip: bool| {
        let mut best = dist[(y, x)];
        for &(dy, dx, weight) in CHAMFER_FWD.iter() {
            let (dy, dx) = if flip { (-dy, -dx) } else { (dy, dx) };
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            if ny >= 0 && nx >= 0 && (ny as usize) < h && (nx as usize) < w {
                let via = dist[(ny as usize, nx as usize)];
                if via < f32::MAX && via + weight < best {
                    best = via + weight;
                }
            }
        }
        dist[(y, x)] = best;
    };

    for y in 0..h {
        for x in 0..w {
            relax(&mut dist, y, x, false);
        }
    }
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            relax(&mut dist, y, x, true);
        }
    }
    dist
}
