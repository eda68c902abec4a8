//! 3D line fits to the triangulated hits of each laser ray.

use laser_calibration_core::{CalibError, Mat3, Pt3, RayIndex, RayLine, RayObservation, Real, Vec3};
use log::debug;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RayFitError {
    #[error("need at least 2 observations to fit a line, got {0}")]
    NotEnoughObservations(usize),
    #[error("all observations coincide")]
    Coincident,
}

/// Total least squares line fit.
#[derive(Debug, Clone, Copy)]
pub struct RayLineSolver;

impl RayLineSolver {
    /// Fit a line through `points`, minimising summed squared perpendicular
    /// distances.
    ///
    /// The line passes through the centroid along the principal eigenvector of
    /// the scatter matrix. The direction is unit length and oriented with
    /// `z >= 0`.
    pub fn fit(ray: RayIndex, points: &[Pt3]) -> Result<RayLine, RayFitError> {
        if points.len() < 2 {
            return Err(RayFitError::NotEnoughObservations(points.len()));
        }
        let n = points.len() as Real;
        let centroid = points.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / n;

        let mut cov = Mat3::zeros();
        for p in points {
            let d = p.coords - centroid;
            cov += d * d.transpose();
        }
        let eigen = cov.symmetric_eigen();
        let imax = eigen.eigenvalues.imax();
        if eigen.eigenvalues[imax] <= Real::EPSILON * (1.0 + centroid.norm_squared()) {
            return Err(RayFitError::Coincident);
        }

        let mut direction: Vec3 = eigen.eigenvectors.column(imax).normalize();
        if direction.z < 0.0 {
            direction = -direction;
        }

        let mut line = RayLine {
            ray,
            centroid: Pt3::from(centroid),
            direction,
            observations: points.len(),
            rms: 0.0,
        };
        let sq: Real = points.iter().map(|p| line.distance_to(p).powi(2)).sum();
        line.rms = (sq / n).sqrt();
        Ok(line)
    }
}

/// Group observations by ray index and fit one line per ray.
///
/// Lines come back in ascending ray order. Rays that cannot be fitted are
/// reported as [`CalibError::DegenerateRayFit`] instead.
pub fn fit_rays(observations: &[RayObservation]) -> (Vec<RayLine>, Vec<CalibError>) {
    let mut by_ray: BTreeMap<RayIndex, Vec<Pt3>> = BTreeMap::new();
    for obs in observations {
        by_ray.entry(obs.ray).or_default().push(obs.point);
    }

    let mut lines = Vec::with_capacity(by_ray.len());
    let mut degenerate = Vec::new();
    for (ray, points) in by_ray {
        match RayLineSolver::fit(ray, &points) {
            Ok(line) => {
                debug!(
                    "ray {ray}: {} observations, rms {:.3e}",
                    line.observations, line.rms
                );
                lines.push(line);
            }
            Err(err) => {
                debug!("ray {ray} skipped: {err}");
                degenerate.push(CalibError::DegenerateRayFit {
                    ray,
                    observations: points.len(),
                });
            }
        }
    }
    (lines, degenerate)
}
