//! Point-on-ray residual of the laser ray-field model.
//!
//! Parameter block `[tx, ty, tz, rx, ry, rz, alpha]`. For ray `(i, j)` of a
//! `W x H` field the direction is `R(r) * (tan((i - W/2) alpha), tan((j - H/2) alpha), 1)`.
//! An observed hit `X` of that ray contributes `(X - t) x d`, which vanishes
//! exactly when `X` lies on the ray.

use laser_calibration_core::{RayObservation, Real};
use nalgebra::{RealField, SVector, Vector3};

/// Below this squared angle the rotation is linearised.
const SMALL_ANGLE2: Real = 1e-16;

/// Fixed data of one residual: the hit point and the ray's offset from the
/// field centre in ray-index units.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RayFieldResidual {
    pub point: [Real; 3],
    pub offset: [Real; 2],
}

impl RayFieldResidual {
    pub fn new(width: usize, height: usize, obs: &RayObservation) -> Self {
        Self {
            point: [obs.point.x, obs.point.y, obs.point.z],
            offset: [
                obs.ray.x as Real - width as Real / 2.0,
                obs.ray.y as Real - height as Real / 2.0,
            ],
        }
    }

    /// `(X - t) x R d` for the 7 packed parameters.
    pub fn evaluate<T: RealField>(&self, params: &[T]) -> SVector<T, 3> {
        debug_assert!(params.len() == 7, "ray field has 7 parameters");
        let t = Vector3::new(params[0].clone(), params[1].clone(), params[2].clone());
        let w = Vector3::new(params[3].clone(), params[4].clone(), params[5].clone());
        let alpha = params[6].clone();

        let local = Vector3::new(
            (T::from_subset(&self.offset[0]) * alpha.clone()).tan(),
            (T::from_subset(&self.offset[1]) * alpha).tan(),
            T::one(),
        );
        let dir = rotate_axis_angle(&w, &local);
        let x = Vector3::new(
            T::from_subset(&self.point[0]),
            T::from_subset(&self.point[1]),
            T::from_subset(&self.point[2]),
        );
        (x - t).cross(&dir)
    }
}

/// Rodrigues rotation of `v` by the axis-angle vector `w`.
pub(crate) fn rotate_axis_angle<T: RealField>(w: &Vector3<T>, v: &Vector3<T>) -> Vector3<T> {
    let theta2 = w.dot(w);
    if theta2 < T::from_subset(&SMALL_ANGLE2) {
        return v + w.cross(v);
    }
    let theta = theta2.sqrt();
    let k = w / theta.clone();
    let (s, c) = theta.sin_cos();
    let kv = k.dot(v);
    v * c.clone() + k.cross(v) * s + k * (kv * (T::one() - c))
}
