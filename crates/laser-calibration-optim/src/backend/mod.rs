//! Solver selection for the ray-field refinement.
//!
//! The dense problems implement [`crate::NllsProblem`] and are solved by
//! [`crate::LmBackend`] by default. [`TinySolverBackend`] builds the same
//! residuals as a tiny-solver factor graph, one residual block per
//! observation.

mod tiny_solver_backend;

use serde::{Deserialize, Serialize};

pub use tiny_solver_backend::TinySolverBackend;

/// Supported solver backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RayFieldBackend {
    /// MINPACK-style dense Levenberg-Marquardt.
    #[default]
    LevenbergMarquardt,
    /// tiny-solver sparse Levenberg-Marquardt.
    TinySolver,
}
