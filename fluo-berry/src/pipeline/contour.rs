//! 连通区域提取与外边界收集.

use crate::Idx2d;
use ndarray::{Array2, ArrayView2};
use std::collections::VecDeque;

const EIGHT_WAY: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const FOUR_WAY: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];

/// 提取前景中像素数最多的 8 连通区域. 没有前景时返回 `None`.
///
/// 像素数并列时取行优先扫描最先遇到的区域.
pub(crate) fn largest_component(mask: ArrayView2<'_, u8>) -> Option<Vec<Idx2d>> {
    let (h, w) = mask.dim();
    let mut visited = Array2::<bool>::from_elem((h, w), false);
    let mut best: Option<Vec<Idx2d>> = None;

    for seed_y in 0..h {
        for seed_x in 0..w {
            if mask[(seed_y, seed_x)] == 0 || visited[(seed_y, seed_x)] {
                continue;
            }
            let mut region = Vec::new();
            let mut frontier = VecDeque::new();
            visited[(seed_y, seed_x)] = true;
            frontier.push_back((seed_y, seed_x));

            while let Some((y, x)) = frontier.pop_front() {
                region.push((y, x));
                for &(dy, dx) in EIGHT_WAY.iter() {
                    let ny = y as isize + dy;
                    let nx = x as isize + dx;
                    if ny < 0 || nx < 0 {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    if ny < h && nx < w && mask[(ny, nx)] != 0 && !visited[(ny, nx)] {
                        visited[(ny, nx)] = true;
                        frontier.push_back((ny, nx));
                    }
                }
            }

            if best.as_ref().map_or(true, |b| region.len() > b.len()) {
                best = Some(region);
            }
        }
    }
    best
}

/// 收集区域的外边界: 与区域外像素 (或图像边缘) 4 相邻的区域像素.
pub(crate) fn boundary_of(region: &[Idx2d], dim: Idx2d) -> Vec<Idx2d> {
    let (h, w) = dim;
    let mut stamp = Array2::<bool>::from_elem((h, w), false);
    for &(y, x) in region {
        stamp[(y, x)] = true;
    }

    region
        .iter()
        .copied()
        .filter(|&(y, x)| {
            FOUR_WAY.iter().any(|&(dy, dx)| {
                let ny = y as isize + dy;
                let nx = x as isize + dx;
                if ny < 0 || nx < 0 || ny as usize >= h || nx as usize >= w {
                    return true;
                }
                !stamp[(ny as usize, nx as usize)]
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::mask::WHITE;

    #[test]
    fn test_largest_component_wins_by_pixel_count() {
        let mut mask = Array2::<u8>::zeros((8, 8));
        // 左上 2x2, 右下 3x3, 其间隔着背景.
        for y in 0..2 {
            for x in 0..2 {
                mask[(y, x)] = WHITE;
            }
        }
        for y in 4..7 {
            for x in 4..7 {
                mask[(y, x)] = WHITE;
            }
        }

        let region = largest_component(mask.view()).unwrap();
        assert_eq!(region.len(), 9);
        assert!(region.contains(&(5, 5)));
        assert!(!region.contains(&(0, 0)));
    }

    #[test]
    fn test_diagonal_pixels_connect() {
        let mut mask = Array2::<u8>::zeros((4, 4));
        mask[(0, 0)] = WHITE;
        mask[(1, 1)] = WHITE;
        mask[(2, 2)] = WHITE;
        let region = largest_component(mask.view()).unwrap();
        assert_eq!(region.len(), 3);
    }

    #[test]
    fn test_empty_mask_has_no_component() {
        let mask = Array2::<u8>::zeros((5, 5));
        assert!(largest_component(mask.view()).is_none());
    }

    #[test]
    fn test_boundary_excludes_interior() {
        let mut mask = Array2::<u8>::zeros((5, 5));
        for y in 1..4 {
            for x in 1..4 {
                mask[(y, x)] = WHITE;
            }
        }
        let region = largest_component(mask.view()).unwrap();
        let boundary = boundary_of(&region, mask.dim());

        assert_eq!(boundary.len(), 8);
        assert!(!boundary.contains(&(2, 2)));
    }

    #[test]
    fn test_boundary_at_image_edge() {
        let mut mask = Array2::<u8>::zeros((3, 3));
        mask[(0, 0)] = WHITE;
        let region = largest_component(mask.view()).unwrap();
        let boundary = boundary_of(&region, mask.dim());
        assert_eq!(boundary, vec![(0, 0)]);
    }
}
