//! Synthetic calibration scenes.
//!
//! These helpers build noise-free lattices, board poses and laser ray fields so
//! the matcher, the linear estimators and the refinement can be checked against
//! known ground truth.

use crate::{
    GridIndex, Iso3, LaserRayField, PinholeIntrinsics, Pt2, Pt3, RayIndex, RayObservation, Real,
    Vec2, Vec3,
};
use nalgebra::{Rotation3, Translation3};

/// Pixels of an `nx x ny` lattice: `origin + i * axis_a + j * axis_b`.
///
/// Nodes are listed row by row (`j` outer, `i` inner).
pub fn lattice_pixels(
    origin: Pt2,
    axis_a: Vec2,
    axis_b: Vec2,
    nx: usize,
    ny: usize,
) -> Vec<(GridIndex, Pt2)> {
    let mut out = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let p = origin + axis_a * i as Real + axis_b * j as Real;
            out.push((GridIndex::new(i as i32, j as i32), p));
        }
    }
    out
}

/// Board corners on `z = 0`, row by row, spaced by `spacing`.
pub fn board_points(nx: usize, ny: usize, spacing: Real) -> Vec<(GridIndex, Pt3)> {
    lattice_pixels(
        Pt2::origin(),
        Vec2::new(spacing, 0.0),
        Vec2::new(0.0, spacing),
        nx,
        ny,
    )
    .into_iter()
    .map(|(g, p)| (g, Pt3::new(p.x, p.y, 0.0)))
    .collect()
}

/// Board-to-camera pose from Euler angles (roll, pitch, yaw) and a translation.
pub fn board_pose(euler: [Real; 3], translation: Vec3) -> Iso3 {
    Iso3::from_parts(
        Translation3::from(translation),
        Rotation3::from_euler_angles(euler[0], euler[1], euler[2]).into(),
    )
}

/// Project board points seen from `pose` through `k`.
///
/// Points behind the camera are dropped.
pub fn project_board(
    k: &PinholeIntrinsics,
    pose: &Iso3,
    points: &[(GridIndex, Pt3)],
) -> Vec<(GridIndex, Pt2)> {
    points
        .iter()
        .filter_map(|(g, p)| k.project(&pose.transform_point(p)).map(|px| (*g, px)))
        .collect()
}

/// Camera-frame point where `ray` of `field` meets the board plane of `pose`.
///
/// Returns `None` when the ray is parallel to the plane or hits it behind the
/// laser.
pub fn ray_board_intersection(field: &LaserRayField, ray: RayIndex, pose: &Iso3) -> Option<Pt3> {
    let normal = pose.rotation * Vec3::z();
    let on_plane = pose.translation.vector;
    let dir = field.direction(ray);
    let denom = normal.dot(&dir);
    if denom.abs() < 1e-12 {
        return None;
    }
    let s = normal.dot(&(on_plane - field.translation())) / denom;
    if s <= 0.0 {
        return None;
    }
    Some(field.origin() + dir * s)
}

/// Observations of every ray in `field` at each of the given ray parameters.
///
/// Each depth `s` becomes a pseudo image index so the observations look like
/// board hits from `depths.len()` images.
pub fn sample_ray_field(field: &LaserRayField, depths: &[Real]) -> Vec<RayObservation> {
    let mut out = Vec::with_capacity(field.width() * field.height() * depths.len());
    for (image_index, &s) in depths.iter().enumerate() {
        for y in 0..field.height() {
            for x in 0..field.width() {
                let ray = RayIndex::new(x as i32, y as i32);
                out.push(RayObservation {
                    ray,
                    point: field.origin() + field.direction(ray) * s,
                    image_index,
                });
            }
        }
    }
    out
}
