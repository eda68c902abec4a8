//! Joint refinement of the laser ray field against triangulated hits.
//!
//! The 7 parameters `[tx, ty, tz, rx, ry, rz, alpha]` are fitted to every
//! [`RayObservation`] at once by minimising
//! `sum_i |(X_i - t) x R d(ray_i)|^2`, three residual rows per observation.
//!
//! Before solving, [`RayFieldProblem::check_rank`] verifies that the
//! observations constrain all 7 parameters; an underdetermined problem is
//! rejected as malformed input rather than handed to the solver.

use crate::backend::{RayFieldBackend, TinySolverBackend};
use crate::factors::ray_field::RayFieldResidual;
use crate::jacobian_ad::{ray_field_jacobian_ad, ray_field_residuals};
use crate::{LmBackend, NllsProblem, NllsSolverBackend, RobustLoss, SolveOptions, SolveReport};
use anyhow::{Context, Result};
use laser_calibration_core::{
    CalibError, LaserRayField, RAY_FIELD_PARAMS, RayIndex, RayObservation, Real,
};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relative singular value threshold of the rank check.
const RANK_TOL: Real = 1e-10;

/// Options for [`refine_ray_field`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayFieldSolveOptions {
    pub solve: SolveOptions,
    pub robust_loss: RobustLoss,
    pub backend: RayFieldBackend,
}

impl Default for RayFieldSolveOptions {
    fn default() -> Self {
        Self {
            solve: SolveOptions::default(),
            robust_loss: RobustLoss::None,
            backend: RayFieldBackend::LevenbergMarquardt,
        }
    }
}

/// Observations of a `width x height` ray field.
#[derive(Debug, Clone)]
pub struct RayFieldProblem {
    width: usize,
    height: usize,
    observations: Vec<RayObservation>,
    residuals: Vec<RayFieldResidual>,
    robust_loss: RobustLoss,
}

impl RayFieldProblem {
    /// # Errors
    ///
    /// [`CalibError::MalformedInput`] for an empty field, no observations,
    /// non-finite points or ray indices outside the field.
    pub fn new(
        width: usize,
        height: usize,
        observations: Vec<RayObservation>,
    ) -> Result<Self, CalibError> {
        if width == 0 || height == 0 {
            return Err(CalibError::malformed(format!(
                "ray field must have at least one ray, got {width}x{height}"
            )));
        }
        if observations.is_empty() {
            return Err(CalibError::malformed("no ray observations to refine against"));
        }
        let inside = |r: RayIndex| {
            r.x >= 0 && r.y >= 0 && (r.x as usize) < width && (r.y as usize) < height
        };
        if let Some(bad) = observations.iter().find(|o| !inside(o.ray)) {
            return Err(CalibError::malformed(format!(
                "ray {} is outside the {width}x{height} field",
                bad.ray
            )));
        }
        if observations.iter().any(|o| !o.point.iter().all(|v| v.is_finite())) {
            return Err(CalibError::malformed("ray observations must be finite"));
        }

        let residuals = observations
            .iter()
            .map(|o| RayFieldResidual::new(width, height, o))
            .collect();
        Ok(Self {
            width,
            height,
            observations,
            residuals,
            robust_loss: RobustLoss::None,
        })
    }

    pub fn with_robust_loss(mut self, loss: RobustLoss) -> Self {
        self.robust_loss = loss;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn observations(&self) -> &[RayObservation] {
        &self.observations
    }

    pub(crate) fn factors(&self) -> &[RayFieldResidual] {
        &self.residuals
    }

    pub fn robust_loss(&self) -> RobustLoss {
        self.robust_loss
    }

    /// Check that the observations determine all 7 parameters at `initial`.
    ///
    /// Requires at least 7 observations of at least 2 distinct rays, spread
    /// over 2 distinct columns or rows so the divergence angle is observable,
    /// and a Jacobian of full column rank at the initial guess.
    pub fn check_rank(&self, initial: &LaserRayField) -> Result<(), CalibError> {
        let n = self.observations.len();
        if n < RAY_FIELD_PARAMS {
            return Err(CalibError::malformed(format!(
                "need at least {RAY_FIELD_PARAMS} ray observations, got {n}"
            )));
        }
        let rays: BTreeSet<RayIndex> = self.observations.iter().map(|o| o.ray).collect();
        if rays.len() < 2 {
            return Err(CalibError::malformed(
                "all observations belong to a single ray; the ray field is undetermined",
            ));
        }
        let cols: BTreeSet<i32> = rays.iter().map(|r| r.x).collect();
        let rows: BTreeSet<i32> = rays.iter().map(|r| r.y).collect();
        if cols.len() < 2 && rows.len() < 2 {
            return Err(CalibError::malformed(
                "observed rays do not span two columns or rows; alpha is unobservable",
            ));
        }

        let x0 = DVector::from_column_slice(&initial.params());
        let j = self.jacobian_unweighted(&x0);
        let sv = j.singular_values();
        let max = sv.max();
        let rank = sv.iter().filter(|&&s| s > RANK_TOL * max).count();
        debug!("ray field jacobian rank {rank} (largest singular value {max:.3e})");
        if !max.is_finite() || rank < RAY_FIELD_PARAMS {
            return Err(CalibError::malformed(format!(
                "ray field jacobian has rank {rank} < {RAY_FIELD_PARAMS} at the initial guess"
            )));
        }
        Ok(())
    }
}

impl NllsProblem for RayFieldProblem {
    fn num_params(&self) -> usize {
        RAY_FIELD_PARAMS
    }

    fn num_residuals(&self) -> usize {
        3 * self.residuals.len()
    }

    fn residuals_unweighted(&self, x: &DVector<Real>) -> DVector<Real> {
        ray_field_residuals(&self.residuals, x)
    }

    fn jacobian_unweighted(&self, x: &DVector<Real>) -> DMatrix<Real> {
        ray_field_jacobian_ad(&self.residuals, x)
    }

    /// One weight per observation, shared by its three rows.
    fn robust_row_scales(&self, r_unweighted: &DVector<Real>) -> DVector<Real> {
        let mut scales = DVector::from_element(r_unweighted.len(), 1.0);
        if self.robust_loss == RobustLoss::None {
            return scales;
        }
        for i in 0..self.residuals.len() {
            let r2 = r_unweighted.fixed_rows::<3>(3 * i).norm_squared();
            let (_, w) = self.robust_loss.rho_and_weight(r2);
            scales.fixed_rows_mut::<3>(3 * i).fill(w.sqrt());
        }
        scales
    }
}

/// Point-to-ray distances of all observations under a field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayFieldStats {
    pub count: usize,
    pub mean: Real,
    pub rms: Real,
    pub max: Real,
}

impl RayFieldStats {
    pub fn compute(field: &LaserRayField, observations: &[RayObservation]) -> Self {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut max: Real = 0.0;
        for obs in observations {
            let d = field.distance(obs.ray, &obs.point);
            sum += d;
            sum_sq += d * d;
            max = max.max(d);
        }
        let n = observations.len().max(1) as Real;
        Self {
            count: observations.len(),
            mean: sum / n,
            rms: (sum_sq / n).sqrt(),
            max,
        }
    }
}

/// Refined field with solver diagnostics and residual statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayFieldEstimate {
    pub field: LaserRayField,
    pub report: SolveReport,
    pub stats: RayFieldStats,
}

/// Refine `initial` against all observations of `problem`.
///
/// The solver runs to its tolerances or its iteration cap; stopping on the
/// cap is reported through [`SolveReport::nonconvergence`], not as an error.
///
/// # Errors
///
/// [`CalibError::MalformedInput`] if `initial` does not match the problem's
/// field size, the rank check fails or the options are invalid.
pub fn refine_ray_field(
    problem: &RayFieldProblem,
    initial: &LaserRayField,
    opts: &RayFieldSolveOptions,
) -> Result<RayFieldEstimate> {
    if initial.width() != problem.width || initial.height() != problem.height {
        return Err(CalibError::malformed(format!(
            "initial field is {}x{}, observations address a {}x{} field",
            initial.width(),
            initial.height(),
            problem.width,
            problem.height
        ))
        .into());
    }
    if !opts.robust_loss.is_valid() {
        return Err(CalibError::malformed(format!(
            "invalid robust loss {:?}",
            opts.robust_loss
        ))
        .into());
    }
    problem.check_rank(initial)?;

    let problem = problem.clone().with_robust_loss(opts.robust_loss);
    let x0 = DVector::from_column_slice(&initial.params());
    let (x, report) = match opts.backend {
        RayFieldBackend::LevenbergMarquardt => LmBackend.solve(&problem, x0, &opts.solve),
        RayFieldBackend::TinySolver => TinySolverBackend
            .solve(&problem, x0, &opts.solve)
            .context("tiny-solver ray field refinement")?,
    };

    let mut params = [0.0; RAY_FIELD_PARAMS];
    params.copy_from_slice(x.as_slice());
    let field = LaserRayField::from_params(problem.width, problem.height, &params)
        .context("refined ray field parameters")?;
    let stats = RayFieldStats::compute(&field, &problem.observations);

    if let Some(diag) = report.nonconvergence() {
        warn!("ray field refinement: {diag}");
    }
    if opts.solve.verbose {
        info!(
            "ray field refined: alpha {:.6}, origin {:?}, cost {:.3e}, rms distance {:.3e}",
            field.alpha(),
            field.translation().as_slice(),
            report.final_cost,
            stats.rms
        );
    }
    Ok(RayFieldEstimate {
        field,
        report,
        stats,
    })
}
