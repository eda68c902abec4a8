//! Configuration of a laser calibration run.

use crate::collaborators::SensitivityParams;
use anyhow::{Result, ensure};
use laser_calibration_core::{PatternKind, RansacOptions, Real, Vec3};
use laser_calibration_linear::GridMatcherOptions;
use laser_calibration_optim::{RayFieldBackend, RayFieldSolveOptions, RobustLoss, SolveOptions};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserCalibrationConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Detection
    // ─────────────────────────────────────────────────────────────────────────
    pub laser_sensitivity: SensitivityParams,
    pub board_sensitivity: SensitivityParams,

    // ─────────────────────────────────────────────────────────────────────────
    // Matching
    // ─────────────────────────────────────────────────────────────────────────
    /// Pixel tolerance between a predicted and a claimed lattice point.
    pub grid_tolerance: Real,
    /// Images with fewer matches for either pattern are skipped.
    pub min_correspondences: usize,
    /// Predict lattice neighbours through a running homography.
    pub homography_guided: bool,
    /// Nearest neighbours per point sampled for axis clustering.
    pub neighbour_count: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // Geometry
    // ─────────────────────────────────────────────────────────────────────────
    /// Board coordinates are lattice indices times this step, on `z = 0`.
    pub board_square_size: Real,
    /// Nominal projection direction of the laser in camera coordinates.
    pub forward_axis: Vec3,
    pub ray_field_width: usize,
    pub ray_field_height: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // Homography
    // ─────────────────────────────────────────────────────────────────────────
    pub homography_ransac: RansacOptions,

    // ─────────────────────────────────────────────────────────────────────────
    // Optimization
    // ─────────────────────────────────────────────────────────────────────────
    /// Divergence angle between neighbouring rays used as the initial guess.
    pub initial_alpha: Real,
    pub max_iters: usize,
    pub ftol: Real,
    pub gtol: Real,
    pub xtol: Real,
    pub verbose: bool,
    pub robust_loss: RobustLoss,
    pub backend: RayFieldBackend,
}

impl Default for LaserCalibrationConfig {
    fn default() -> Self {
        let solve = SolveOptions::default();
        Self {
            // Detection
            laser_sensitivity: SensitivityParams::laser(),
            board_sensitivity: SensitivityParams::board(),
            // Matching
            grid_tolerance: 6.0,
            min_correspondences: 15,
            homography_guided: true,
            neighbour_count: 4,
            // Geometry
            board_square_size: 1.0,
            forward_axis: Vec3::z(),
            ray_field_width: 18,
            ray_field_height: 18,
            // Homography
            homography_ransac: RansacOptions::default(),
            // Optimize
            initial_alpha: 0.01,
            max_iters: solve.max_iters,
            ftol: solve.ftol,
            gtol: solve.gtol,
            xtol: solve.xtol,
            verbose: false,
            robust_loss: RobustLoss::None,
            backend: RayFieldBackend::default(),
        }
    }
}

impl LaserCalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.grid_tolerance > 0.0 && self.grid_tolerance.is_finite(),
            "grid_tolerance must be positive, got {}",
            self.grid_tolerance
        );
        ensure!(self.neighbour_count > 0, "neighbour_count must be positive");
        ensure!(
            self.board_square_size > 0.0 && self.board_square_size.is_finite(),
            "board_square_size must be positive, got {}",
            self.board_square_size
        );
        ensure!(
            self.forward_axis.norm() > 0.0 && self.forward_axis.iter().all(|v| v.is_finite()),
            "forward_axis must be a finite non-zero vector"
        );
        ensure!(
            self.ray_field_width > 0 && self.ray_field_height > 0,
            "ray field must have at least one ray, got {}x{}",
            self.ray_field_width,
            self.ray_field_height
        );
        ensure!(self.initial_alpha.is_finite(), "initial_alpha must be finite");
        ensure!(self.max_iters > 0, "max_iters must be positive");
        ensure!(
            self.robust_loss.is_valid(),
            "invalid robust loss {:?}",
            self.robust_loss
        );
        Ok(())
    }

    pub fn matcher_opts(&self) -> GridMatcherOptions {
        GridMatcherOptions {
            tolerance: self.grid_tolerance,
            homography_guided: self.homography_guided,
        }
    }

    pub fn solve_opts(&self) -> RayFieldSolveOptions {
        RayFieldSolveOptions {
            solve: SolveOptions {
                max_iters: self.max_iters,
                ftol: self.ftol,
                gtol: self.gtol,
                xtol: self.xtol,
                verbose: self.verbose,
            },
            robust_loss: self.robust_loss,
            backend: self.backend,
        }
    }

    pub fn sensitivity(&self, pattern: PatternKind) -> &SensitivityParams {
        match pattern {
            PatternKind::Laser => &self.laser_sensitivity,
            PatternKind::Board => &self.board_sensitivity,
        }
    }
}
