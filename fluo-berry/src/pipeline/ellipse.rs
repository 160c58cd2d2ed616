//! 边界点集的直接最小二乘椭圆拟合.
//!
//! Halir-Flusser 数值稳定版: 把散布矩阵按二次项与一次项分块, 将带约束的
//! 广义特征问题化简为 3x3 实特征问题, 再用三次特征多项式求根.

use crate::Idx2d;
use nalgebra::{Matrix3, Vector3};

/// 拟合出的椭圆几何量, 坐标为 (行, 列).
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct EllipseGeom {
    /// 中心.
    pub center: (f64, f64),

    /// 半轴长, 先长轴后短轴.
    pub axes: (f64, f64),
}

/// 对边界点集做直接最小二乘椭圆拟合.
///
/// 点数不足 5、点集退化 (共线) 或最优解不是椭圆时返回 `None`.
pub(crate) fn fit_ellipse(points: &[Idx2d]) -> Option<EllipseGeom> {
    if points.len() < 5 {
        return None;
    }

    // 以质心为原点改善条件数, 中心最后再平移回去.
    let n = points.len() as f64;
    let mut mean_x = 0.0;
    let mut mean_y = 0.0;
    for &(row, col) in points {
        mean_x += col as f64;
        mean_y += row as f64;
    }
    mean_x /= n;
    mean_y /= n;

    let mut s1 = Matrix3::<f64>::zeros();
    let mut s2 = Matrix3::<f64>::zeros();
    let mut s3 = Matrix3::<f64>::zeros();
    for &(row, col) in points {
        let x = col as f64 - mean_x;
        let y = row as f64 - mean_y;
        let quad = Vector3::new(x * x, x * y, y * y);
        let lin = Vector3::new(x, y, 1.0);
        s1 += quad * quad.transpose();
        s2 += quad * lin.transpose();
        s3 += lin * lin.transpose();
    }

    let t = -s3.try_inverse()? * s2.transpose();
    let m_raw = s1 + s2 * t;
    let m = Matrix3::from_rows(&[
        m_raw.row(2) * 0.5,
        -m_raw.row(1),
        m_raw.row(0) * 0.5,
    ]);

    // λ³ − tr·λ² + m₂·λ − det = 0.
    let tr = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
        + m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    let mut quad_part: Option<Vector3<f64>> = None;
    let mut best_gap = 0.0;
    for lambda in solve_cubic_real(-tr, minors, -det) {
        let shifted = m - Matrix3::identity() * lambda;
        let Some(v) = null_vector_3x3(&shifted) else {
            continue;
        };
        // 椭圆解的判据: 4ac − b² > 0, 且只有一个特征向量满足.
        let gap = 4.0 * v[0] * v[2] - v[1] * v[1];
        if gap > best_gap {
            best_gap = gap;
            quad_part = Some(v);
        }
    }
    let a1 = quad_part?;
    let a2 = t * a1;

    let geom = conic_to_ellipse(a1[0], a1[1], a1[2], a2[0], a2[1], a2[2])?;
    Some(EllipseGeom {
        center: (geom.center.0 + mean_y, geom.center.1 + mean_x),
        axes: geom.axes,
    })
}

/// 由一般二次型 `ax² + bxy + cy² + dx + ey + f = 0` 求椭圆几何量.
fn conic_to_ellipse(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Option<EllipseGeom> {
    // 系数整体符号是任意的, 先归一成二次部迹为正.
    let (a, b, c, d, e, f) = if a + c < 0.0 {
        (-a, -b, -c, -d, -e, -f)
    } else {
        (a, b, c, d, e, f)
    };
    let den = 4.0 * a * c - b * b;
    if den <= 0.0 {
        return None;
    }
    let x0 = (b * e - 2.0 * c * d) / den;
    let y0 = (b * d - 2.0 * a * e) / den;

    // 二次部的特征值给出主轴方向上的曲率.
    let half_sum = (a + c) * 0.5;
    let half_gap = (((a - c) * (a - c) + b * b).sqrt()) * 0.5;
    let (lo, hi) = (half_sum - half_gap, half_sum + half_gap);

    let at_center = a * x0 * x0 + b * x0 * y0 + c * y0 * y0 + d * x0 + e * y0 + f;
    let scale = -at_center;
    if scale <= 0.0 || lo <= 0.0 {
        return None;
    }
    Some(EllipseGeom {
        center: (y0, x0),
        axes: ((scale / lo).sqrt(), (scale / hi).sqrt()),
    })
}

/// 求 `x³ + a₂x² + a₁x + a₀ = 0` 的全部实根.
fn solve_cubic_real(a2: f64, a1: f64, a0: f64) -> Vec<f64> {
    let shift = a2 / 3.0;
    let p = a1 - a2 * a2 / 3.0;
    let q = 2.0 * a2 * a2 * a2 / 27.0 - a2 * a1 / 3.0 + a0;

    if p.abs() < 1e-12 {
        return vec![(-q).cbrt() - shift];
    }

    let disc = (q / 2.0) * (q / 2.0) + (p / 3.0) * (p / 3.0) * (p / 3.0);
    if disc > 0.0 {
        let root = disc.sqrt();
        let t = (-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt();
        return vec![t - shift];
    }

    // 三实根: 三角求解.
    let radius = 2.0 * (-p / 3.0).sqrt();
    let phi = (3.0 * q / (p * radius)).clamp(-1.0, 1.0).acos();
    (0..3)
        .map(|k| radius * ((phi + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos() - shift)
        .collect()
}

/// 取奇异 3x3 矩阵的零空间向量: 行向量两两叉积中模最大者.
fn null_vector_3x3(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows: [Vector3<f64>; 3] = [
        m.row(0).transpose(),
        m.row(1).transpose(),
        m.row(2).transpose(),
    ];
    let candidates = [
        rows[0].cross(&rows[1]),
        rows[0].cross(&rows[2]),
        rows[1].cross(&rows[2]),
    ];
    let best = candidates
        .into_iter()
        .max_by(|u, v| u.norm().total_cmp(&v.norm()))?;
    let norm = best.norm();
    if norm < 1e-12 {
        return None;
    }
    Some(best / norm)
}
