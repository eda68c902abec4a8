//! Integer lattice addressing.

use crate::{Pt2, Real};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Integer node of an idealised calibration lattice.
///
/// `x` grows along the first lattice axis, `y` along the second. Indices are
/// independent of pixel positions and may be negative while a lattice is being
/// grown; finished correspondence sets are re-based to start at zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridIndex {
    pub x: i32,
    pub y: i32,
}

/// Address of one ray in a laser ray field.
///
/// Ray indices are the lattice coordinates of matched laser dots.
pub type RayIndex = GridIndex;

impl GridIndex {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Component-wise minimum.
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    /// Lattice node as a planar point with the given step size.
    pub fn to_point(self, spacing: Real) -> Pt2 {
        Pt2::new(self.x as Real * spacing, self.y as Real * spacing)
    }
}

impl Add for GridIndex {
    type Output = GridIndex;

    fn add(self, rhs: Self) -> Self::Output {
        self.offset(rhs.x, rhs.y)
    }
}

impl Sub for GridIndex {
    type Output = GridIndex;

    fn sub(self, rhs: Self) -> Self::Output {
        self.offset(-rhs.x, -rhs.y)
    }
}

impl fmt::Display for GridIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Which calibration pattern a point set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Dots left by the laser rays on the board.
    Laser,
    /// Checkerboard corners of the board itself.
    Board,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Laser => f.write_str("laser"),
            PatternKind::Board => f.write_str("board"),
        }
    }
}
