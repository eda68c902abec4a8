//! Closed-form building blocks of the laser calibration.
//!
//! - lattice matching ([`GridMatcher`]) and lattice axis estimation,
//! - normalized DLT homographies and board poses from them,
//! - board-plane triangulation of laser dots,
//! - per-ray line fits and the least-squares common origin.

mod grid_axes;
mod grid_matcher;
mod homography;
pub mod math;
mod planar_pose;
mod ray_fit;
mod ray_origin;
mod triangulation;

pub use grid_axes::*;
pub use grid_matcher::*;
pub use homography::*;
pub use planar_pose::*;
pub use ray_fit::*;
pub use ray_origin::*;
pub use triangulation::*;
