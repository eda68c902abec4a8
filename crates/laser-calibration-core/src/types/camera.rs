use crate::{BrownConrady5, DistortionModel, Mat3, Pt2, Pt3, Real, Vec2};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics `fx, fy, cx, cy, skew`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeIntrinsics {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    #[serde(default)]
    pub skew: Real,
}

impl PinholeIntrinsics {
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, self.skew, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// Pixel to normalized image coordinates (`K^-1`).
    pub fn normalize(&self, pixel: &Pt2) -> Vec2 {
        let y = (pixel.y - self.cy) / self.fy;
        let x = (pixel.x - self.cx - self.skew * y) / self.fx;
        Vec2::new(x, y)
    }

    /// Normalized image coordinates to pixel (`K`).
    pub fn denormalize(&self, n: &Vec2) -> Pt2 {
        Pt2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }

    /// Project a camera-frame point; `None` behind or on the image plane.
    pub fn project(&self, p: &Pt3) -> Option<Pt2> {
        if p.z <= Real::EPSILON {
            return None;
        }
        Some(self.denormalize(&Vec2::new(p.x / p.z, p.y / p.z)))
    }
}

/// Calibrated camera as consumed by the laser calibration.
///
/// Intrinsics and distortion are held fixed throughout. Detected pixels are
/// taken in the distorted (raw) image; every geometric stage works on pixels
/// passed through [`CameraModel::undistort_pixel`] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: PinholeIntrinsics,
    #[serde(default)]
    pub distortion: BrownConrady5<Real>,
}

impl CameraModel {
    pub fn pinhole(intrinsics: PinholeIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: BrownConrady5::default(),
        }
    }

    pub fn with_distortion(mut self, distortion: BrownConrady5<Real>) -> Self {
        self.distortion = distortion;
        self
    }

    pub fn is_pinhole(&self) -> bool {
        self.distortion.is_identity()
    }

    /// Project a camera-frame point into the raw (distorted) image.
    pub fn project(&self, p: &Pt3) -> Option<Pt2> {
        if p.z <= Real::EPSILON {
            return None;
        }
        let n = self.distortion.distort(&Vec2::new(p.x / p.z, p.y / p.z));
        Some(self.intrinsics.denormalize(&n))
    }

    /// Raw pixel to the pixel an ideal pinhole camera would have recorded.
    pub fn undistort_pixel(&self, pixel: &Pt2) -> Pt2 {
        if self.is_pinhole() {
            return *pixel;
        }
        let n = self.distortion.undistort(&self.intrinsics.normalize(pixel));
        self.intrinsics.denormalize(&n)
    }

    pub fn undistort_pixels(&self, pixels: &[Pt2]) -> Vec<Pt2> {
        pixels.iter().map(|p| self.undistort_pixel(p)).collect()
    }
}
