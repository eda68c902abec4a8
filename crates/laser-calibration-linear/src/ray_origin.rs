//! Common origin of the fitted laser rays and the initial field orientation.
//!
//! Every ray passes through the laser origin `o`. For a ray with centroid `c`
//! and direction `d`, `o` lies on the ray iff `[d]x o = [d]x c`. Stacking the
//! three rows of every ray gives an overdetermined system whose least-squares
//! solution minimises the summed squared perpendicular distances from `o` to
//! all rays.

use laser_calibration_core::{Pt3, RayLine, Real, Vec3, skew_symmetric};
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RayOriginError {
    #[error("need at least 2 fitted rays to intersect, got {0}")]
    NotEnoughRays(usize),
    #[error("rays are parallel; their intersection is undetermined")]
    Parallel,
}

/// Least-squares intersection of `lines`, solved by QR decomposition.
pub fn estimate_ray_origin(lines: &[RayLine]) -> Result<Pt3, RayOriginError> {
    if lines.len() < 2 {
        return Err(RayOriginError::NotEnoughRays(lines.len()));
    }

    let mut a = DMatrix::<Real>::zeros(3 * lines.len(), 3);
    let mut b = DVector::<Real>::zeros(3 * lines.len());
    for (i, line) in lines.iter().enumerate() {
        let s = skew_symmetric(&line.direction.normalize());
        a.fixed_view_mut::<3, 3>(3 * i, 0).copy_from(&s);
        b.fixed_rows_mut::<3>(3 * i)
            .copy_from(&(s * line.centroid.coords));
    }

    let qr = a.qr();
    let r = qr.r();
    let scale = r.diagonal().amax();
    if scale <= 0.0 || r.diagonal().iter().any(|v| v.abs() <= 1e-10 * scale) {
        return Err(RayOriginError::Parallel);
    }
    let qtb = qr.q().transpose() * b;
    let x = r
        .solve_upper_triangular(&qtb)
        .ok_or(RayOriginError::Parallel)?;
    Ok(Pt3::new(x[0], x[1], x[2]))
}

/// Axis-angle rotation turning `forward` onto the direction of `towards`.
///
/// Axis `forward x towards` (normalised), angle `acos(forward . towards / |towards|)`.
/// The pipeline passes the vector from the estimated origin to the centroid
/// of all ray hits, i.e. the mean projection direction of the field.
/// Returns the zero rotation when `towards` is zero or already along
/// `forward`, and a half turn about an axis perpendicular to `forward` when it
/// points the opposite way.
pub fn initial_orientation(towards: &Vec3, forward: &Vec3) -> Vec3 {
    let (tn, f_norm) = (towards.norm(), forward.norm());
    if tn <= Real::EPSILON || f_norm <= Real::EPSILON {
        return Vec3::zeros();
    }
    let f = forward / f_norm;
    let cos = (f.dot(towards) / tn).clamp(-1.0, 1.0);
    let axis = f.cross(towards);
    if axis.norm() > 1e-12 * tn {
        return axis.normalize() * cos.acos();
    }
    if cos > 0.0 {
        Vec3::zeros()
    } else {
        let helper = if f.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        f.cross(&helper).normalize() * PI
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laser_calibration_core::{RayIndex, rotation_from_axis_angle};

    fn line(origin: &Pt3, dir: Vec3, s: Real) -> RayLine {
        RayLine {
            ray: RayIndex::new(0, 0),
            centroid: origin + dir * s,
            direction: dir.normalize(),
            observations: 2,
            rms: 0.0,
        }
    }

    #[test]
    fn intersects_exact_rays() {
        let origin = Pt3::new(120.0, -40.0, 15.0);
        let lines = vec![
            line(&origin, Vec3::new(0.1, 0.0, 1.0), 400.0),
            line(&origin, Vec3::new(-0.1, 0.05, 1.0), 550.0),
            line(&origin, Vec3::new(0.0, -0.1, 1.0), 300.0),
        ];
        let est = estimate_ray_origin(&lines).unwrap();
        assert!((est - origin).norm() < 1e-8, "{est}");
    }

    #[test]
    fn minimises_distance_to_skew_rays() {
        // Two skew lines; the closest point is midway between them.
        let lines = vec![
            RayLine {
                ray: RayIndex::new(0, 0),
                centroid: Pt3::new(0.0, 0.0, 1.0),
                direction: Vec3::x(),
                observations: 2,
                rms: 0.0,
            },
            RayLine {
                ray: RayIndex::new(1, 0),
                centroid: Pt3::new(0.0, 0.0, -1.0),
                direction: Vec3::y(),
                observations: 2,
                rms: 0.0,
            },
        ];
        let est = estimate_ray_origin(&lines).unwrap();
        assert!(est.coords.norm() < 1e-12, "{est}");
    }

    #[test]
    fn rejects_parallel_and_single_rays() {
        let o = Pt3::origin();
        let dir = Vec3::new(0.0, 0.0, 1.0);
        assert_eq!(
            estimate_ray_origin(&[line(&o, dir, 1.0)]),
            Err(RayOriginError::NotEnoughRays(1))
        );
        let parallel = vec![
            line(&Pt3::new(0.0, 0.0, 0.0), dir, 5.0),
            line(&Pt3::new(3.0, 0.0, 0.0), dir, 5.0),
        ];
        assert_eq!(estimate_ray_origin(&parallel), Err(RayOriginError::Parallel));
    }

    #[test]
    fn orientation_turns_forward_onto_target() {
        let forward = Vec3::z();
        let towards = Vec3::new(100.0, -50.0, 300.0);
        let rvec = initial_orientation(&towards, &forward);
        let turned = rotation_from_axis_angle(&rvec) * forward;
        assert!((turned - towards.normalize()).norm() < 1e-12);

        assert_eq!(initial_orientation(&Vec3::new(0.0, 0.0, 5.0), &forward), Vec3::zeros());
        assert_eq!(initial_orientation(&Vec3::zeros(), &forward), Vec3::zeros());
        let flipped = initial_orientation(&Vec3::new(0.0, 0.0, -5.0), &forward);
        assert!((flipped.norm() - PI).abs() < 1e-12);
        assert!(flipped.dot(&forward).abs() < 1e-12);
    }
}
