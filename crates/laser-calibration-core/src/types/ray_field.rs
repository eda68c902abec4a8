//! Laser ray-field model and the observations used to fit it.

use crate::{CalibError, Mat3, Pt3, RayIndex, Real, Vec3, rotation_from_axis_angle};
use serde::{Deserialize, Serialize};

/// Number of scalar parameters of a ray field: translation (3), axis-angle (3), alpha (1).
pub const RAY_FIELD_PARAMS: usize = 7;

/// Triangulated 3D point where one laser ray hit the board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayObservation {
    /// Ray that produced the point.
    pub ray: RayIndex,
    /// Point in camera coordinates.
    pub point: Pt3,
    /// Image the point was triangulated from.
    pub image_index: usize,
}

/// 3D line fitted to all observations of one ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayLine {
    pub ray: RayIndex,
    /// Centroid of the observations.
    pub centroid: Pt3,
    /// Unit direction of the principal axis.
    pub direction: Vec3,
    /// Number of observations the line was fitted to.
    pub observations: usize,
    /// Root mean square perpendicular distance of the observations.
    pub rms: Real,
}

impl RayLine {
    /// Perpendicular distance of `p` from the line.
    pub fn distance_to(&self, p: &Pt3) -> Real {
        (p - self.centroid).cross(&self.direction).norm()
    }
}

/// Parametric model of a `width x height` grid of laser rays.
///
/// Ray `(rx, ry)` leaves `translation` along
/// `R * (tan((rx - W/2) * alpha), tan((ry - H/2) * alpha), 1)` where `R` is the
/// axis-angle `rotation`. The direction grid is always derived from these
/// parameters; instances are never mutated, refinement produces a new one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaserRayField {
    width: usize,
    height: usize,
    alpha: Real,
    rotation: Vec3,
    translation: Vec3,
}

impl LaserRayField {
    /// # Errors
    ///
    /// [`CalibError::MalformedInput`] for an empty grid or non-finite parameters.
    pub fn new(
        width: usize,
        height: usize,
        alpha: Real,
        rotation: Vec3,
        translation: Vec3,
    ) -> Result<Self, CalibError> {
        if width == 0 || height == 0 {
            return Err(CalibError::malformed(format!(
                "ray field must have at least one ray, got {width}x{height}"
            )));
        }
        let finite = alpha.is_finite()
            && rotation.iter().all(|v| v.is_finite())
            && translation.iter().all(|v| v.is_finite());
        if !finite {
            return Err(CalibError::malformed("ray field parameters must be finite"));
        }
        Ok(Self {
            width,
            height,
            alpha,
            rotation,
            translation,
        })
    }

    /// Build from the packed `[tx, ty, tz, rx, ry, rz, alpha]` layout.
    pub fn from_params(
        width: usize,
        height: usize,
        params: &[Real; RAY_FIELD_PARAMS],
    ) -> Result<Self, CalibError> {
        Self::new(
            width,
            height,
            params[6],
            Vec3::new(params[3], params[4], params[5]),
            Vec3::new(params[0], params[1], params[2]),
        )
    }

    /// Packed `[tx, ty, tz, rx, ry, rz, alpha]` parameters.
    pub fn params(&self) -> [Real; RAY_FIELD_PARAMS] {
        let t = &self.translation;
        let r = &self.rotation;
        [t.x, t.y, t.z, r.x, r.y, r.z, self.alpha]
    }

    /// A new field with the same grid size and different parameters.
    pub fn with_params(
        &self,
        alpha: Real,
        rotation: Vec3,
        translation: Vec3,
    ) -> Result<Self, CalibError> {
        Self::new(self.width, self.height, alpha, rotation, translation)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn alpha(&self) -> Real {
        self.alpha
    }

    /// Axis-angle rotation (axis scaled by angle).
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn origin(&self) -> Pt3 {
        Pt3::from(self.translation)
    }

    pub fn rotation_matrix(&self) -> Mat3 {
        rotation_from_axis_angle(&self.rotation)
    }

    pub fn contains(&self, ray: RayIndex) -> bool {
        ray.x >= 0 && ray.y >= 0 && (ray.x as usize) < self.width && (ray.y as usize) < self.height
    }

    /// Direction of `ray` before rotation, with unit z component.
    pub fn local_direction(&self, ray: RayIndex) -> Vec3 {
        let cx = self.width as Real / 2.0;
        let cy = self.height as Real / 2.0;
        Vec3::new(
            ((ray.x as Real - cx) * self.alpha).tan(),
            ((ray.y as Real - cy) * self.alpha).tan(),
            1.0,
        )
    }

    /// Direction of `ray` in camera coordinates (not normalised).
    pub fn direction(&self, ray: RayIndex) -> Vec3 {
        self.rotation_matrix() * self.local_direction(ray)
    }

    /// Origin and direction of `ray`.
    pub fn ray(&self, ray: RayIndex) -> (Pt3, Vec3) {
        (self.origin(), self.direction(ray))
    }

    /// All ray directions, row by row (`y` outer, `x` inner).
    pub fn directions(&self) -> Vec<Vec3> {
        let r = self.rotation_matrix();
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(r * self.local_direction(RayIndex::new(x as i32, y as i32)));
            }
        }
        out
    }

    /// Norm of `(p - t) x d`, the quantity the refinement drives to zero.
    pub fn residual(&self, ray: RayIndex, p: &Pt3) -> Real {
        (p.coords - self.translation)
            .cross(&self.direction(ray))
            .norm()
    }

    /// Perpendicular distance of `p` from `ray`.
    pub fn distance(&self, ray: RayIndex, p: &Pt3) -> Real {
        let d = self.direction(ray);
        (p.coords - self.translation).cross(&d).norm() / d.norm()
    }
}
