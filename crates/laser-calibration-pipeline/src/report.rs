//! Outputs of a calibration run.

use laser_calibration_core::{
    CalibError, CorrespondenceCollection, Iso3, LaserRayField, Mat3, Pt3, RayLine,
    RayObservation, Real, Vec3,
};
use laser_calibration_optim::{RayFieldStats, SolveReport};
use serde::{Deserialize, Serialize};

/// An image left out of the calibration and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedImage {
    pub image_index: usize,
    pub reason: CalibError,
}

/// Checkerboard geometry of one accepted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardView {
    pub image_index: usize,
    /// Board plane (`z = 0`, board units) to pixels.
    pub homography: Mat3,
    /// Board to camera, `T_C_B`.
    pub pose: Iso3,
}

/// Diagnostics of every stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserCalibrationReport {
    /// Images that passed the correspondence check, in input order.
    pub accepted_images: Vec<usize>,
    pub skipped_images: Vec<SkippedImage>,
    pub board_views: Vec<BoardView>,
    /// Laser observations whose ray index fell outside the configured field.
    pub out_of_field: usize,
    /// Images with laser points that could not be triangulated; their laser
    /// correspondences carry no world points.
    pub incomplete_images: Vec<usize>,
    /// Rays seen too rarely for a line fit; still used by the refinement.
    pub degenerate_rays: Vec<CalibError>,
    pub lines: Vec<RayLine>,
    /// Least-squares intersection of `lines`.
    pub origin: Pt3,
    /// Axis-angle guess handed to the refinement.
    pub initial_rotation: Vec3,
    pub initial_alpha: Real,
    pub solve: SolveReport,
    /// Point-to-ray distances under the refined field.
    pub stats: RayFieldStats,
}

/// Refined ray field together with everything it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserCalibrationResult {
    pub field: LaserRayField,
    /// Accepted images; laser correspondences carry their triangulated points.
    pub collection: CorrespondenceCollection,
    pub observations: Vec<RayObservation>,
    pub report: LaserCalibrationReport,
}

impl LaserCalibrationResult {
    /// Whether the solver met its tolerances; the field is returned either way.
    pub fn converged(&self) -> bool {
        self.report.solve.converged
    }
}
