//! Numerical conditioning shared by the linear solvers.

use laser_calibration_core::{Mat3, Pt2};

/// Hartley normalisation of 2D points.
///
/// Translates the centroid to the origin and scales so the mean distance from
/// it is `sqrt(2)`. Returns the normalised points and the `3x3` transform `T`
/// with `p_norm = T * p`, or `None` when the input is empty or all points
/// coincide.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points.iter().fold(Pt2::origin().coords, |acc, p| acc + p.coords) / n;
    let mean_dist = points
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Mat3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let normalized = points
        .iter()
        .map(|p| Pt2::from((p.coords - centroid) * s))
        .collect();
    Some((normalized, t))
}
