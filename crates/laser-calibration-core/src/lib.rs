//! Core math and data model for `laser-calibration`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...) and small helpers,
//! - the lattice/correspondence data model shared by the matcher and the pipeline,
//! - the laser ray-field model ([`LaserRayField`]) and its observations,
//! - the error taxonomy ([`CalibError`]),
//! - a generic RANSAC engine (`ransac_fit`, [`Estimator`]),
//! - synthetic data generators used by tests across the workspace.

/// Error taxonomy shared by all calibration stages.
pub mod error;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Generic RANSAC engine and traits.
pub mod ransac;
/// Synthetic lattices, poses and ray fields for tests and examples.
pub mod synthetic;
mod types;

pub use error::*;
pub use math::*;
pub use ransac::*;
pub use types::*;
