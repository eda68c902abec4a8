use crate::{PatternKind, RayIndex, Real};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure and diagnostic kinds of a calibration run.
///
/// Only [`CalibError::MalformedInput`] aborts a run. The remaining kinds
/// describe inputs that are skipped (images, rays) or results the caller may
/// choose to reject (solver stopping early).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibError {
    /// A pattern in one image matched fewer lattice points than required.
    #[error("insufficient {pattern} correspondences: found {found}, need at least {required}")]
    InsufficientCorrespondence {
        pattern: PatternKind,
        found: usize,
        required: usize,
    },
    /// A ray was observed too few times to fit a 3D line.
    #[error("ray ({}, {}) has {observations} observation(s), need at least 2", .ray.x, .ray.y)]
    DegenerateRayFit { ray: RayIndex, observations: usize },
    /// The non-linear solver stopped without meeting its tolerances.
    #[error("solver stopped after {iterations} iterations without converging (final cost {final_cost:e})")]
    SolverNonconvergence { iterations: usize, final_cost: Real },
    /// Inputs violate a structural precondition.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl CalibError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    /// Whether the run can continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedInput(_))
    }
}
