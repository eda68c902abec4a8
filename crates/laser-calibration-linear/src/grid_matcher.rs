//! Assignment of detected points to an integer lattice.
//!
//! Growth starts from a seed assigned `(0, 0)` and walks lattice neighbours in
//! a fixed order (down, right, left, up). Each neighbour's pixel position is
//! predicted, and the first unclaimed point within `tolerance` of the
//! prediction is claimed. Claims are never released, so every seed yields one
//! maximal tree; seeds are tried in ascending distance from the pixel origin
//! and the largest tree wins.
//!
//! Two predictors are available:
//!
//! - axis prediction: the neighbour is the claimed pixel `± axis_a` / `± axis_b`;
//! - homography prediction: a lattice-to-pixel homography is refitted from the
//!   tree's correspondences whenever it has grown, and the neighbour is the
//!   image of its lattice coordinate. Until the tree holds four points spread
//!   over two rows or two columns the axis predictor is used.
//!
//! Traversal uses an explicit stack, so dense point sets cannot exhaust the
//! call stack.

use crate::homography::dlt_homography;
use laser_calibration_core::{
    CorrespondenceSet, GridIndex, Mat3, Pt2, Real, Vec2, apply_homography,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Lattice steps in visit order, with the matching axis offset sign.
const STEPS: [(GridIndex, Axis, Real); 4] = [
    (GridIndex::new(0, 1), Axis::B, 1.0),
    (GridIndex::new(1, 0), Axis::A, 1.0),
    (GridIndex::new(-1, 0), Axis::A, -1.0),
    (GridIndex::new(0, -1), Axis::B, -1.0),
];

#[derive(Debug, Clone, Copy)]
enum Axis {
    A,
    B,
}

/// Options for [`GridMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridMatcherOptions {
    /// Maximum pixel distance between a prediction and the claimed point.
    pub tolerance: Real,
    /// Predict neighbours through a homography refitted as the tree grows.
    pub homography_guided: bool,
}

impl Default for GridMatcherOptions {
    fn default() -> Self {
        Self {
            tolerance: 6.0,
            homography_guided: true,
        }
    }
}

/// Lattice matcher for one pair of approximate basis vectors.
#[derive(Debug, Clone)]
pub struct GridMatcher {
    axis_a: Vec2,
    axis_b: Vec2,
    opts: GridMatcherOptions,
}

/// Match `points` with the default (homography-guided) predictor.
pub fn match_grid(
    points: &[Pt2],
    axis_a: &Vec2,
    axis_b: &Vec2,
    tolerance: Real,
) -> CorrespondenceSet {
    let opts = GridMatcherOptions {
        tolerance,
        ..Default::default()
    };
    GridMatcher::new(*axis_a, *axis_b, opts).match_points(points)
}

impl GridMatcher {
    pub fn new(axis_a: Vec2, axis_b: Vec2, opts: GridMatcherOptions) -> Self {
        Self {
            axis_a,
            axis_b,
            opts,
        }
    }

    pub fn options(&self) -> &GridMatcherOptions {
        &self.opts
    }

    /// Largest connected lattice assignment of `points`, re-based so the
    /// smallest index on each axis is zero.
    ///
    /// Points with non-finite coordinates are ignored. Ties between
    /// candidates inside the tolerance go to the one closest to the pixel
    /// origin (the first in pool order).
    pub fn match_points(&self, points: &[Pt2]) -> CorrespondenceSet {
        let mut pool = Pool::new(points);
        let mut best = Tree::default();
        let mut seeds = 0usize;

        while pool.remaining() > best.len() {
            let Some(seed_pixel) = pool.take_first() else {
                break;
            };
            let tree = self.grow(&mut pool, seed_pixel);
            seeds += 1;
            debug!(
                "grid seed {seeds} at ({:.1}, {:.1}) grew {} points, {} left in pool",
                seed_pixel.x,
                seed_pixel.y,
                tree.len(),
                pool.remaining()
            );
            if tree.len() > best.len() {
                best = tree;
            }
        }

        debug!(
            "grid matching kept {} of {} points after {seeds} seeds",
            best.len(),
            points.len()
        );
        best.into_set()
    }

    fn grow(&self, pool: &mut Pool, seed: Pt2) -> Tree {
        let mut tree = Tree::default();
        let mut predictor = LatticeHomography::default();
        let origin = GridIndex::default();
        tree.claim(origin, seed);
        if self.opts.homography_guided {
            predictor.push(origin, seed);
        }

        let mut stack = vec![Frame {
            grid: origin,
            pixel: seed,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(&(step, axis, sign)) = STEPS.get(frame.next) else {
                stack.pop();
                continue;
            };
            frame.next += 1;
            let (grid, pixel) = (frame.grid + step, frame.pixel);
            if tree.contains(grid) {
                continue;
            }

            let guided = if self.opts.homography_guided {
                predictor.predict(grid)
            } else {
                None
            };
            let predicted = guided.unwrap_or_else(|| pixel + self.axis(axis) * sign);

            let Some(claimed) = pool.take_within(&predicted, self.opts.tolerance) else {
                continue;
            };
            tree.claim(grid, claimed);
            if self.opts.homography_guided {
                predictor.push(grid, claimed);
            }
            stack.push(Frame {
                grid,
                pixel: claimed,
                next: 0,
            });
        }
        tree
    }

    fn axis(&self, axis: Axis) -> Vec2 {
        match axis {
            Axis::A => self.axis_a,
            Axis::B => self.axis_b,
        }
    }
}

/// Pending neighbour visits of one claimed point.
struct Frame {
    grid: GridIndex,
    pixel: Pt2,
    next: usize,
}

/// Unclaimed points, ordered by distance from the pixel origin.
///
/// Slots are tombstoned on claim so pool order never changes.
struct Pool {
    slots: Vec<Option<Pt2>>,
    remaining: usize,
}

impl Pool {
    fn new(points: &[Pt2]) -> Self {
        let mut sorted: Vec<Pt2> = points
            .iter()
            .filter(|p| p.x.is_finite() && p.y.is_finite())
            .copied()
            .collect();
        sorted.sort_by(|a, b| a.coords.norm().total_cmp(&b.coords.norm()));
        let remaining = sorted.len();
        Self {
            slots: sorted.into_iter().map(Some).collect(),
            remaining,
        }
    }

    fn remaining(&self) -> usize {
        self.remaining
    }

    fn take_first(&mut self) -> Option<Pt2> {
        self.take_where(|_| true)
    }

    /// Claim the first point closer than `tolerance` to `target`.
    fn take_within(&mut self, target: &Pt2, tolerance: Real) -> Option<Pt2> {
        self.take_where(|p| (p - target).norm() < tolerance)
    }

    fn take_where(&mut self, pred: impl Fn(&Pt2) -> bool) -> Option<Pt2> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(p) if pred(p)))?;
        self.remaining -= 1;
        slot.take()
    }
}

/// One grown lattice tree.
#[derive(Default)]
struct Tree {
    set: CorrespondenceSet,
    occupied: HashSet<GridIndex>,
    min: GridIndex,
}

impl Tree {
    fn len(&self) -> usize {
        self.set.len()
    }

    fn contains(&self, grid: GridIndex) -> bool {
        self.occupied.contains(&grid)
    }

    fn claim(&mut self, grid: GridIndex, pixel: Pt2) {
        self.set.push(grid, pixel);
        self.occupied.insert(grid);
        self.min = self.min.min(grid);
    }

    fn into_set(self) -> CorrespondenceSet {
        let min = self.min;
        self.set.shifted(GridIndex::new(-min.x, -min.y))
    }
}

/// Lattice-to-pixel homography over a growing tree, refitted lazily.
#[derive(Default)]
struct LatticeHomography {
    lattice: Vec<Pt2>,
    pixels: Vec<Pt2>,
    rows: HashMap<i32, usize>,
    cols: HashMap<i32, usize>,
    model: Option<Mat3>,
    stale: bool,
}

impl LatticeHomography {
    fn push(&mut self, grid: GridIndex, pixel: Pt2) {
        self.lattice.push(grid.to_point(1.0));
        self.pixels.push(pixel);
        *self.rows.entry(grid.y).or_default() += 1;
        *self.cols.entry(grid.x).or_default() += 1;
        self.stale = true;
    }

    /// Four points with no three collinear exist once two rows (or two
    /// columns) each hold at least two points.
    fn well_posed(&self) -> bool {
        let spread = |lines: &HashMap<i32, usize>| lines.values().filter(|&&n| n >= 2).count() >= 2;
        spread(&self.rows) || spread(&self.cols)
    }

    fn predict(&mut self, grid: GridIndex) -> Option<Pt2> {
        if self.stale {
            self.stale = false;
            self.model = if self.well_posed() {
                dlt_homography(&self.lattice, &self.pixels).ok()
            } else {
                None
            };
        }
        self.model
            .as_ref()
            .and_then(|h| apply_homography(h, &grid.to_point(1.0)))
    }
}
