//! Ray-field Jacobian by forward-mode automatic differentiation.
//!
//! Every observation depends on all 7 parameters, so each one is
//! differentiated with a fixed-size dual vector and its `3 x 7` block is
//! written into the global matrix.

use crate::factors::ray_field::RayFieldResidual;
use laser_calibration_core::{RAY_FIELD_PARAMS, Real};
use nalgebra::{DMatrix, DVector, SVector};
use num_dual::{DualSVec64, jacobian};

pub(crate) fn ray_field_jacobian_ad(residuals: &[RayFieldResidual], x: &DVector<Real>) -> DMatrix<Real> {
    debug_assert_eq!(x.len(), RAY_FIELD_PARAMS);
    let p0 = SVector::<Real, RAY_FIELD_PARAMS>::from_column_slice(x.as_slice());

    let mut j_global = DMatrix::zeros(3 * residuals.len(), RAY_FIELD_PARAMS);
    for (i, res) in residuals.iter().enumerate() {
        let (_, j_obs) = jacobian(
            |p: SVector<DualSVec64<RAY_FIELD_PARAMS>, RAY_FIELD_PARAMS>| {
                res.evaluate(p.as_slice())
            },
            p0,
        );
        j_global
            .fixed_view_mut::<3, RAY_FIELD_PARAMS>(3 * i, 0)
            .copy_from(&j_obs);
    }
    j_global
}

pub(crate) fn ray_field_residuals(residuals: &[RayFieldResidual], x: &DVector<Real>) -> DVector<Real> {
    let mut r = DVector::zeros(3 * residuals.len());
    for (i, res) in residuals.iter().enumerate() {
        r.fixed_rows_mut::<3>(3 * i)
            .copy_from(&res.evaluate(x.as_slice()));
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use laser_calibration_core::{LaserRayField, Pt3, RayIndex, RayObservation, Vec3};

    #[test]
    fn autodiff_matches_finite_differences() {
        let field = LaserRayField::new(
            4,
            3,
            0.05,
            Vec3::new(0.05, -0.2, 0.1),
            Vec3::new(100.0, -20.0, 5.0),
        )
        .unwrap();
        let obs = [
            RayObservation {
                ray: RayIndex::new(0, 2),
                point: Pt3::new(80.0, 30.0, 450.0),
                image_index: 0,
            },
            RayObservation {
                ray: RayIndex::new(3, 1),
                point: Pt3::new(-20.0, -15.0, 700.0),
                image_index: 1,
            },
        ];
        let residuals: Vec<RayFieldResidual> = obs
            .iter()
            .map(|o| RayFieldResidual::new(4, 3, o))
            .collect();
        let x = DVector::from_column_slice(&field.params());
        let j = ray_field_jacobian_ad(&residuals, &x);

        let h = 1e-6;
        for c in 0..RAY_FIELD_PARAMS {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[c] += h;
            xm[c] -= h;
            let fd = (ray_field_residuals(&residuals, &xp) - ray_field_residuals(&residuals, &xm))
                / (2.0 * h);
            for r in 0..fd.len() {
                let scale = 1.0 + fd[r].abs();
                assert!(
                    (j[(r, c)] - fd[r]).abs() < 1e-4 * scale,
                    "J[{r},{c}] = {} vs fd {}",
                    j[(r, c)],
                    fd[r]
                );
            }
        }
    }
}
