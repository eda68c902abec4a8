//! Laser-dot triangulation on the checkerboard plane.
//!
//! A laser pixel is mapped back onto the board through the inverse board
//! homography, which yields board-local coordinates on `z = 0`, and then moved
//! into the camera frame with the board pose `T_C_B`.

use crate::homography::PlanarHomography;
use laser_calibration_core::{CorrespondenceSet, Iso3, Pt2, Pt3, RayObservation};
use log::debug;

/// Camera-frame point where the viewing ray of `pixel` meets the board.
///
/// Returns `None` if the pixel maps to the line at infinity of the board plane.
pub fn triangulate_on_board(homography: &PlanarHomography, pose: &Iso3, pixel: &Pt2) -> Option<Pt3> {
    let board = homography.inverse(pixel)?;
    Some(pose.transform_point(&Pt3::new(board.x, board.y, 0.0)))
}

/// Triangulate every laser correspondence of one image.
///
/// The lattice index of each correspondence becomes the ray index of the
/// observation. Points that cannot be triangulated are dropped.
pub fn triangulate_laser_set(
    homography: &PlanarHomography,
    pose: &Iso3,
    laser: &CorrespondenceSet,
    image_index: usize,
) -> Vec<RayObservation> {
    let out: Vec<RayObservation> = laser
        .iter()
        .filter_map(|c| {
            triangulate_on_board(homography, pose, &c.pixel).map(|point| RayObservation {
                ray: c.grid,
                point,
                image_index,
            })
        })
        .collect();
    if out.len() < laser.len() {
        debug!(
            "image {image_index}: {} laser points fell on the horizon of the board",
            laser.len() - out.len()
        );
    }
    out
}
