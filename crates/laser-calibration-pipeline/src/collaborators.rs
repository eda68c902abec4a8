//! Seams to the systems the calibration depends on but does not implement.
//!
//! Image processing, the checkerboard homography, board extrinsics and the
//! orientation clustering are each behind a small trait so a caller can plug
//! in its own implementation. Default implementations built on
//! `laser-calibration-linear` are provided for everything except feature
//! extraction, which always needs real images.

use anyhow::{Context, Result, ensure};
use laser_calibration_core::{
    CameraModel, CorrespondenceSet, GridIndex, Iso3, Mat3, PatternKind, Pt2, Pt3, RansacOptions,
    Real,
};
use laser_calibration_linear::{
    AngleSample, TwoMeansClusterer, dlt_homography_ransac, estimate_planar_pose_from_h,
};
use log::debug;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Feature extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Corner detector settings for one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityParams {
    /// Minimum accepted corner quality, relative to the strongest corner.
    pub quality_level: Real,
    /// Minimum pixel distance between returned corners.
    pub min_distance: Real,
    /// Neighbourhood size of the corner measure.
    pub block_size: usize,
    pub use_harris: bool,
    /// Free parameter of the Harris detector.
    pub harris_k: Real,
    /// Upper bound on returned corners.
    pub max_points: usize,
    /// Refine corners to sub-pixel accuracy.
    pub subpixel: bool,
}

impl SensitivityParams {
    /// Defaults for laser dots.
    pub fn laser() -> Self {
        Self {
            quality_level: 0.01,
            min_distance: 15.0,
            block_size: 7,
            use_harris: false,
            harris_k: 0.04,
            max_points: 1000,
            subpixel: true,
        }
    }

    /// Defaults for checkerboard corners.
    pub fn board() -> Self {
        Self {
            max_points: 15000,
            ..Self::laser()
        }
    }
}

/// Candidate pixel points of one pattern in one image.
///
/// Implementations are expected to isolate the requested pattern themselves
/// (colour mask, exposure, region of interest) and return raw pixels; lens
/// distortion is removed later with the camera model.
pub trait FeatureExtractor {
    type Image;

    fn extract(
        &self,
        image: &Self::Image,
        pattern: PatternKind,
        params: &SensitivityParams,
    ) -> Result<Vec<Pt2>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Orientation clustering
// ─────────────────────────────────────────────────────────────────────────────

/// Splits neighbour offset samples into the two lattice directions.
pub trait OrientationClusterer {
    fn cluster(&self, samples: &[AngleSample]) -> Result<[AngleSample; 2]>;
}

impl OrientationClusterer for TwoMeansClusterer {
    fn cluster(&self, samples: &[AngleSample]) -> Result<[AngleSample; 2]> {
        Ok(TwoMeansClusterer::cluster(self, samples)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Board geometry
// ─────────────────────────────────────────────────────────────────────────────

/// Homography mapping board-plane coordinates to (undistorted) pixels.
pub trait HomographyEstimator {
    fn estimate(&self, board: &[Pt2], pixels: &[Pt2]) -> Result<Mat3>;
}

/// Normalized DLT inside RANSAC.
#[derive(Debug, Clone, Copy, Default)]
pub struct DltRansacHomography {
    pub ransac: RansacOptions,
}

impl HomographyEstimator for DltRansacHomography {
    fn estimate(&self, board: &[Pt2], pixels: &[Pt2]) -> Result<Mat3> {
        let (h, inliers) = dlt_homography_ransac(board, pixels, &self.ransac)?;
        debug!("board homography: {}/{} inliers", inliers.len(), board.len());
        Ok(h)
    }
}

/// Board-to-camera pose with the camera intrinsics held fixed.
pub trait ExtrinsicEstimator {
    /// Pose from raw detected `pixels` of the `board` points.
    fn estimate(&self, camera: &CameraModel, board: &[Pt3], pixels: &[Pt2]) -> Result<Iso3>;

    /// Pose when the board homography to undistorted pixels is already known.
    ///
    /// The default ignores `homography` and calls [`ExtrinsicEstimator::estimate`].
    fn estimate_with_homography(
        &self,
        camera: &CameraModel,
        board: &[Pt3],
        pixels: &[Pt2],
        homography: &Mat3,
    ) -> Result<Iso3> {
        let _ = homography;
        self.estimate(camera, board, pixels)
    }
}

/// Extrinsics from the decomposition of a board homography.
///
/// Only planar targets (`z = 0`) are supported. Pixels are undistorted with
/// the camera's distortion model before the homography is fitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarPoseExtrinsics {
    pub homography: DltRansacHomography,
}

fn ensure_planar(board: &[Pt3]) -> Result<()> {
    ensure!(
        board.iter().all(|p| p.z.abs() <= 1e-9),
        "planar pose needs board points on z = 0"
    );
    Ok(())
}

impl ExtrinsicEstimator for PlanarPoseExtrinsics {
    fn estimate(&self, camera: &CameraModel, board: &[Pt3], pixels: &[Pt2]) -> Result<Iso3> {
        ensure_planar(board)?;
        let planar: Vec<Pt2> = board.iter().map(|p| Pt2::new(p.x, p.y)).collect();
        let h = self
            .homography
            .estimate(&planar, &camera.undistort_pixels(pixels))?;
        estimate_planar_pose_from_h(&camera.intrinsics.k_matrix(), &h)
            .context("homography decomposition")
    }

    fn estimate_with_homography(
        &self,
        camera: &CameraModel,
        board: &[Pt3],
        _pixels: &[Pt2],
        homography: &Mat3,
    ) -> Result<Iso3> {
        ensure_planar(board)?;
        estimate_planar_pose_from_h(&camera.intrinsics.k_matrix(), homography)
            .context("homography decomposition")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lattice correction
// ─────────────────────────────────────────────────────────────────────────────

/// Hook to edit a matched lattice before it is checked and collected.
pub trait LatticeCorrection {
    fn correct(
        &self,
        image_index: usize,
        pattern: PatternKind,
        set: CorrespondenceSet,
    ) -> CorrespondenceSet;
}

/// Leaves every set untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl LatticeCorrection for NoCorrection {
    fn correct(&self, _: usize, _: PatternKind, set: CorrespondenceSet) -> CorrespondenceSet {
        set
    }
}

/// Constant lattice offsets for selected images and patterns.
///
/// Used when part of a pattern was missed and the re-based indices start one
/// or more nodes late.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeShift {
    shifts: Vec<(usize, PatternKind, GridIndex)>,
}

impl LatticeShift {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift `pattern` in image `image_index` by `delta`; repeated calls add up.
    pub fn with(mut self, image_index: usize, pattern: PatternKind, delta: GridIndex) -> Self {
        self.shifts.push((image_index, pattern, delta));
        self
    }

    pub fn delta(&self, image_index: usize, pattern: PatternKind) -> GridIndex {
        self.shifts
            .iter()
            .filter(|(i, p, _)| *i == image_index && *p == pattern)
            .fold(GridIndex::default(), |acc, (_, _, d)| acc + *d)
    }
}

impl LatticeCorrection for LatticeShift {
    fn correct(
        &self,
        image_index: usize,
        pattern: PatternKind,
        set: CorrespondenceSet,
    ) -> CorrespondenceSet {
        let delta = self.delta(image_index, pattern);
        if delta == GridIndex::default() {
            return set;
        }
        debug!("image {image_index}: shifting {pattern} lattice by {delta}");
        set.shifted(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laser_calibration_core::{BrownConrady5, PinholeIntrinsics, Vec3, synthetic};

    #[test]
    fn board_defaults_allow_more_points() {
        let laser = SensitivityParams::laser();
        let board = SensitivityParams::board();
        assert_eq!(laser.max_points, 1000);
        assert_eq!(board.max_points, 15000);
        assert_eq!(board.block_size, laser.block_size);
        assert!(!board.use_harris);
    }

    #[test]
    fn planar_pose_recovers_board_pose() {
        let camera = CameraModel::pinhole(PinholeIntrinsics {
            fx: 900.0,
            fy: 880.0,
            cx: 640.0,
            cy: 480.0,
            skew: 0.0,
        });
        let pose = synthetic::board_pose([0.1, -0.2, 0.05], Vec3::new(-50.0, -40.0, 600.0));
        let board = synthetic::board_points(6, 5, 25.0);
        let pixels = synthetic::project_board(&camera.intrinsics, &pose, &board);
        let points: Vec<Pt3> = board.iter().map(|(_, p)| *p).collect();
        let px: Vec<Pt2> = pixels.iter().map(|(_, p)| *p).collect();

        let est = PlanarPoseExtrinsics::default()
            .estimate(&camera, &points, &px)
            .unwrap();
        assert!((est.translation.vector - pose.translation.vector).norm() < 1e-6);
        assert!(est.rotation.angle_to(&pose.rotation) < 1e-6);

        let lifted: Vec<Pt3> = points.iter().map(|p| Pt3::new(p.x, p.y, 1.0)).collect();
        assert!(PlanarPoseExtrinsics::default()
            .estimate(&camera, &lifted, &px)
            .is_err());
    }

    #[test]
    fn planar_pose_removes_lens_distortion() {
        let intrinsics = PinholeIntrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 640.0,
            cy: 480.0,
            skew: 0.0,
        };
        let camera = CameraModel::pinhole(intrinsics).with_distortion(BrownConrady5 {
            iters: 30,
            ..BrownConrady5::radial(-0.2, 0.05, 0.0)
        });
        let pose = synthetic::board_pose([0.15, 0.1, -0.05], Vec3::new(-150.0, -100.0, 500.0));
        let points: Vec<Pt3> = synthetic::board_points(6, 5, 25.0)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        let raw: Vec<Pt2> = points
            .iter()
            .map(|p| camera.project(&pose.transform_point(p)).unwrap())
            .collect();

        let est = PlanarPoseExtrinsics::default()
            .estimate(&camera, &points, &raw)
            .unwrap();
        let err = (est.translation.vector - pose.translation.vector).norm();
        assert!(err < 1e-5, "translation error {err}");

        let pinhole = CameraModel::pinhole(intrinsics);
        let biased = PlanarPoseExtrinsics::default()
            .estimate(&pinhole, &points, &raw)
            .unwrap();
        let bias = (biased.translation.vector - pose.translation.vector).norm();
        assert!(bias > 1.0, "ignoring distortion moved the board by only {bias}");

        let planar: Vec<Pt2> = points.iter().map(|p| Pt2::new(p.x, p.y)).collect();
        let h = DltRansacHomography::default()
            .estimate(&planar, &camera.undistort_pixels(&raw))
            .unwrap();
        let via_h = PlanarPoseExtrinsics::default()
            .estimate_with_homography(&camera, &points, &raw, &h)
            .unwrap();
        assert!((via_h.translation.vector - est.translation.vector).norm() < 1e-9);
    }

    #[test]
    fn lattice_shift_applies_to_matching_image_only() {
        let set = CorrespondenceSet::from_parts(
            vec![GridIndex::new(0, 0), GridIndex::new(1, 0)],
            vec![Pt2::new(10.0, 10.0), Pt2::new(40.0, 10.0)],
        )
        .unwrap();
        let shift = LatticeShift::new()
            .with(2, PatternKind::Laser, GridIndex::new(1, 0))
            .with(2, PatternKind::Laser, GridIndex::new(0, 2));

        let moved = shift.correct(2, PatternKind::Laser, set.clone());
        assert_eq!(
            moved.grid_indices(),
            vec![GridIndex::new(1, 2), GridIndex::new(2, 2)]
        );
        assert_eq!(shift.correct(1, PatternKind::Laser, set.clone()), set);
        assert_eq!(shift.correct(2, PatternKind::Board, set.clone()), set);
        assert_eq!(NoCorrection.correct(2, PatternKind::Laser, set.clone()), set);
    }

    #[test]
    fn clusterer_trait_matches_inherent_clustering() {
        let samples = [
            AngleSample::from_offset(&laser_calibration_core::Vec2::new(30.0, 1.0)),
            AngleSample::from_offset(&laser_calibration_core::Vec2::new(-1.0, 25.0)),
            AngleSample::from_offset(&laser_calibration_core::Vec2::new(31.0, -1.0)),
        ];
        let via_trait = OrientationClusterer::cluster(&TwoMeansClusterer, &samples).unwrap();
        assert_eq!(via_trait, TwoMeansClusterer.cluster(&samples).unwrap());
        assert!(OrientationClusterer::cluster(&TwoMeansClusterer, &samples[..1]).is_err());
    }
}
