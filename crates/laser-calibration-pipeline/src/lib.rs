//! End-to-end calibration of a laser ray field against a camera.
//!
//! The camera intrinsics are known. Each image shows a planar checkerboard
//! hit by a grid of laser rays; the board is moved between images so every
//! ray is observed at several depths.
//!
//! ```no_run
//! use laser_calibration_core::{CameraModel, PatternKind, PinholeIntrinsics, Pt2};
//! use laser_calibration_pipeline::{
//!     FeatureExtractor, LaserCalibrationConfig, LaserGeometryEstimator, SensitivityParams,
//! };
//!
//! struct Detector;
//!
//! impl FeatureExtractor for Detector {
//!     type Image = Vec<u8>;
//!
//!     fn extract(
//!         &self,
//!         _image: &Vec<u8>,
//!         _pattern: PatternKind,
//!         _params: &SensitivityParams,
//!     ) -> anyhow::Result<Vec<Pt2>> {
//!         unimplemented!()
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! # let images: Vec<Vec<u8>> = unimplemented!();
//! let camera = CameraModel::pinhole(PinholeIntrinsics {
//!     fx: 1200.0,
//!     fy: 1200.0,
//!     cx: 640.0,
//!     cy: 480.0,
//!     skew: 0.0,
//! });
//! let estimator = LaserGeometryEstimator::new(camera, LaserCalibrationConfig::default())?;
//! let result = estimator.run(&images, &Detector)?;
//! println!("alpha = {}", result.field.alpha());
//! # Ok(())
//! # }
//! ```

mod collaborators;
mod config;
mod estimator;
mod report;

pub use collaborators::*;
pub use config::*;
pub use estimator::*;
pub use report::*;
