//! Board pose from a plane-to-image homography.
//!
//! With fixed intrinsics `K`, a homography `H` from board coordinates (`z = 0`)
//! to pixels factors as `H ~ K [r1 r2 t]`. The pose is recovered by scaling
//! `K^-1 H`, completing the rotation with `r3 = r1 x r2` and projecting onto
//! SO(3).

use anyhow::{Result, anyhow, bail};
use laser_calibration_core::{Iso3, Mat3, Pt2, Pt3, Real, Vec3, from_homogeneous};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};

/// Linear board-pose initialisation from a homography.
#[derive(Debug, Clone, Copy)]
pub struct PlanarPoseSolver;

/// Pose mapping board coordinates into camera coordinates.
pub fn estimate_planar_pose_from_h(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3> {
    PlanarPoseSolver::from_homography(kmtx, hmtx)
}

impl PlanarPoseSolver {
    /// Decompose `hmtx` into `T_C_B` given intrinsics `kmtx`.
    ///
    /// The scale is the mean norm of the first two columns of `K^-1 H`, and the
    /// sign is chosen so the board lies in front of the camera (`t.z > 0`).
    pub fn from_homography(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3> {
        let k_inv = kmtx
            .try_inverse()
            .ok_or_else(|| anyhow!("intrinsics matrix is not invertible"))?;
        let m = k_inv * hmtx;

        let n1 = m.column(0).norm();
        let n2 = m.column(1).norm();
        if n1 <= 1e-12 || n2 <= 1e-12 {
            bail!("degenerate homography for planar pose extraction");
        }
        let mut lambda = 2.0 / (n1 + n2);
        if m[(2, 2)] * lambda < 0.0 {
            lambda = -lambda;
        }

        let r1: Vec3 = m.column(0) * lambda;
        let r2: Vec3 = m.column(1) * lambda;
        let t: Vec3 = m.column(2) * lambda;
        let r3 = r1.cross(&r2);
        if r3.norm() <= 1e-12 {
            bail!("degenerate homography for planar pose extraction");
        }

        let approx = Mat3::from_columns(&[r1, r2, r3]);
        let rot = nearest_rotation(&approx)?;
        Ok(Iso3::from_parts(
            Translation3::from(t),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot)),
        ))
    }
}

/// Closest rotation in the Frobenius sense (polar decomposition via SVD).
fn nearest_rotation(m: &Mat3) -> Result<Mat3> {
    let svd = m.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| anyhow!("svd failed during planar pose extraction"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow!("svd failed during planar pose extraction"))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Ok(r)
}

/// Mean distance in pixels between `pixels` and the projection of `board` (z = 0).
pub fn mean_transfer_error(
    kmtx: &Mat3,
    pose: &Iso3,
    board: &[Pt2],
    pixels: &[Pt2],
) -> Real {
    if board.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for (b, p) in board.iter().zip(pixels) {
        let pc = pose.transform_point(&Pt3::new(b.x, b.y, 0.0));
        let v = kmtx * pc.coords;
        sum += (from_homogeneous(&v) - p).norm();
    }
    sum / board.len() as Real
}

#[cfg(test)]
mod tests {
    use super::*;
    use laser_calibration_core::{PinholeIntrinsics, apply_homography, synthetic};

    fn kmtx() -> Mat3 {
        PinholeIntrinsics {
            fx: 900.0,
            fy: 880.0,
            cx: 640.0,
            cy: 480.0,
            skew: 0.0,
        }
        .k_matrix()
    }

    #[test]
    fn recovers_pose_from_exact_homography() {
        let k = kmtx();
        let pose = synthetic::board_pose([0.15, -0.1, 0.3], Vec3::new(-20.0, 10.0, 300.0));
        let r = pose.rotation.to_rotation_matrix();
        let t = pose.translation.vector;
        // Scale is arbitrary for a homography.
        let h = Mat3::from_columns(&[k * r.matrix().column(0), k * r.matrix().column(1), k * t]) * -3.5;

        let est = estimate_planar_pose_from_h(&k, &h).unwrap();
        assert!((est.translation.vector - t).norm() < 1e-6);
        let angle = est.rotation.angle_to(&pose.rotation);
        assert!(angle < 1e-6, "rotation error {angle}");

        let board = [Pt2::new(0.0, 0.0), Pt2::new(10.0, 0.0), Pt2::new(0.0, 10.0)];
        let pixels: Vec<Pt2> = board
            .iter()
            .map(|b| apply_homography(&h, b).unwrap())
            .collect();
        assert!(mean_transfer_error(&k, &est, &board, &pixels) < 1e-6);
    }

    #[test]
    fn rejects_rank_deficient_homography() {
        let mut h = Mat3::identity();
        h.column_mut(1).fill(0.0);
        assert!(estimate_planar_pose_from_h(&kmtx(), &h).is_err());
    }
}
