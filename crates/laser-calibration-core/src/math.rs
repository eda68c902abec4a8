use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Iso3 = Isometry3<Real>;

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Apply a planar projective transform with homogeneous division.
///
/// Returns `None` when the point maps to infinity.
pub fn apply_homography(h: &Mat3, p: &Pt2) -> Option<Pt2> {
    let v = h * to_homogeneous(p);
    if v.z.abs() <= Real::EPSILON {
        return None;
    }
    Some(from_homogeneous(&v))
}

/// Cross-product matrix `[v]x` such that `[v]x * w == v x w`.
pub fn skew_symmetric(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Rotation matrix of an axis-angle vector (axis scaled by angle).
pub fn rotation_from_axis_angle(rvec: &Vec3) -> Mat3 {
    Rotation3::new(*rvec).into_inner()
}
