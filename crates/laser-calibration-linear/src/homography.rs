//! Plane-induced homography estimation.
//!
//! Implements the normalized Direct Linear Transform and a RANSAC wrapper on
//! top of the generic engine in `laser_calibration_core`. A homography `H` maps
//! points of a source plane (board or lattice coordinates) to image pixels:
//! `x' ~ H x`. [`PlanarHomography`] keeps `H` together with its inverse so
//! pixels can be mapped back onto the plane.

use crate::math::normalize_points_2d;
use laser_calibration_core::{
    Estimator, Mat3, Pt2, RansacOptions, apply_homography, from_homogeneous, ransac_fit,
    to_homogeneous,
};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("source / target counts must match: {0} vs {1}")]
    LengthMismatch(usize, usize),
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
    #[error("homography is not invertible")]
    Singular,
    #[error("ransac failed to find a consensus homography")]
    NoConsensus,
}

/// Normalized DLT and DLT+RANSAC homography estimation.
#[derive(Debug, Clone, Copy)]
pub struct HomographySolver;

/// Estimate `H` with `target ~ H * source` using the normalized DLT.
pub fn dlt_homography(source: &[Pt2], target: &[Pt2]) -> Result<Mat3, HomographyError> {
    HomographySolver::dlt(source, target)
}

/// Estimate `H` with DLT inside RANSAC; returns `H` and the inlier indices.
pub fn dlt_homography_ransac(
    source: &[Pt2],
    target: &[Pt2],
    opts: &RansacOptions,
) -> Result<(Mat3, Vec<usize>), HomographyError> {
    HomographySolver::dlt_ransac(source, target, opts)
}

fn check_inputs(source: &[Pt2], target: &[Pt2]) -> Result<(), HomographyError> {
    if source.len() != target.len() {
        return Err(HomographyError::LengthMismatch(source.len(), target.len()));
    }
    if source.len() < 4 {
        return Err(HomographyError::NotEnoughPoints(source.len()));
    }
    Ok(())
}

impl HomographySolver {
    /// Normalized DLT.
    ///
    /// Both point sets are Hartley-normalised, `A h = 0` is solved via SVD of
    /// the `2n x 9` design matrix (padded to square when `n == 4`) and the
    /// result is de-normalised and scaled so that `H[2,2] == 1` when possible.
    pub fn dlt(source: &[Pt2], target: &[Pt2]) -> Result<Mat3, HomographyError> {
        check_inputs(source, target)?;
        let n = source.len();

        let (src_n, t_src) = normalize_points_2d(source).ok_or(HomographyError::Degenerate)?;
        let (dst_n, t_dst) = normalize_points_2d(target).ok_or(HomographyError::Degenerate)?;

        let rows = (2 * n).max(9);
        let mut a = DMatrix::<f64>::zeros(rows, 9);
        for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
            let (x, y, u, v) = (s.x, s.y, d.x, d.y);
            let r = 2 * i;
            a[(r, 0)] = -x;
            a[(r, 1)] = -y;
            a[(r, 2)] = -1.0;
            a[(r, 6)] = u * x;
            a[(r, 7)] = u * y;
            a[(r, 8)] = u;
            a[(r + 1, 3)] = -x;
            a[(r + 1, 4)] = -y;
            a[(r + 1, 5)] = -1.0;
            a[(r + 1, 6)] = v * x;
            a[(r + 1, 7)] = v * y;
            a[(r + 1, 8)] = v;
        }

        let svd = a.svd(false, true);
        let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;
        let h = v_t.row(svd.singular_values.imin());
        let h_norm = Mat3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

        let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
        let mut hmtx = t_dst_inv * h_norm * t_src;
        let scale = hmtx[(2, 2)];
        if scale.abs() > f64::EPSILON {
            hmtx /= scale;
        }
        Ok(hmtx)
    }

    /// DLT inside RANSAC with Euclidean transfer error in target units.
    pub fn dlt_ransac(
        source: &[Pt2],
        target: &[Pt2],
        opts: &RansacOptions,
    ) -> Result<(Mat3, Vec<usize>), HomographyError> {
        check_inputs(source, target)?;

        let data: Vec<(Pt2, Pt2)> = source.iter().copied().zip(target.iter().copied()).collect();
        let res = ransac_fit::<HomographyEstimator>(&data, opts);
        match res.model {
            Some(h) if res.success => Ok((h, res.inliers)),
            _ => Err(HomographyError::NoConsensus),
        }
    }
}

struct HomographyEstimator;

impl HomographyEstimator {
    fn fit_indices(data: &[(Pt2, Pt2)], idx: &[usize]) -> Option<Mat3> {
        let (src, dst): (Vec<Pt2>, Vec<Pt2>) = idx.iter().map(|&i| data[i]).unzip();
        HomographySolver::dlt(&src, &dst).ok()
    }
}

impl Estimator for HomographyEstimator {
    type Datum = (Pt2, Pt2);
    type Model = Mat3;

    const MIN_SAMPLES: usize = 4;

    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model> {
        Self::fit_indices(data, sample)
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        let proj = model * to_homogeneous(&datum.0);
        if proj.z.abs() <= f64::EPSILON {
            return f64::INFINITY;
        }
        (from_homogeneous(&proj) - datum.1).norm()
    }

    fn is_degenerate(data: &[Self::Datum], sample: &[usize]) -> bool {
        // Any three collinear source points make the minimal sample degenerate.
        let pts: Vec<Pt2> = sample.iter().map(|&i| data[i].0).collect();
        for i in 0..pts.len() {
            for j in (i + 1)..pts.len() {
                for k in (j + 1)..pts.len() {
                    let area = (pts[j] - pts[i]).perp(&(pts[k] - pts[i]));
                    if area.abs() < 1e-9 {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        if inliers.len() < Self::MIN_SAMPLES {
            return None;
        }
        Self::fit_indices(data, inliers)
    }
}

/// A homography together with its inverse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarHomography {
    h: Mat3,
    h_inv: Mat3,
}

impl PlanarHomography {
    pub fn new(h: Mat3) -> Result<Self, HomographyError> {
        let h_inv = h.try_inverse().ok_or(HomographyError::Singular)?;
        Ok(Self { h, h_inv })
    }

    pub fn matrix(&self) -> &Mat3 {
        &self.h
    }

    pub fn inverse_matrix(&self) -> &Mat3 {
        &self.h_inv
    }

    /// Plane point to pixel.
    pub fn forward(&self, p: &Pt2) -> Option<Pt2> {
        apply_homography(&self.h, p)
    }

    /// Pixel back onto the plane.
    pub fn inverse(&self, p: &Pt2) -> Option<Pt2> {
        apply_homography(&self.h_inv, p)
    }
}
