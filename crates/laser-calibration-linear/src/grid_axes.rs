//! Approximate lattice basis vectors from an unordered point set.
//!
//! Every point contributes the offsets to its `k` nearest neighbours. Offsets
//! that are not relative-neighbourhood edges (some third point is closer to
//! both ends) are dropped, which removes lattice diagonals. The remaining
//! offsets are reduced to `(orientation, length)` samples and split into two
//! clusters, one per lattice direction.

use laser_calibration_core::{Pt2, Real, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::PI;
use thiserror::Error;

const MAX_ITERS: usize = 50;

#[derive(Debug, Error, PartialEq)]
pub enum GridAxesError {
    #[error("need at least 2 neighbour samples to find two directions, got {0}")]
    NotEnoughSamples(usize),
    #[error("neighbour offsets do not split into two directions")]
    SingleDirection,
}

/// Orientation of a neighbour offset in `[0, pi)` and its length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleSample {
    pub angle: Real,
    pub magnitude: Real,
}

impl AngleSample {
    pub fn from_offset(v: &Vec2) -> Self {
        Self {
            angle: fold_angle(v.y.atan2(v.x)),
            magnitude: v.norm(),
        }
    }

    pub fn to_vector(&self) -> Vec2 {
        Vec2::new(self.angle.cos(), self.angle.sin()) * self.magnitude
    }
}

fn fold_angle(a: Real) -> Real {
    let folded = a.rem_euclid(PI);
    // rem_euclid can round up to exactly pi
    if folded >= PI { 0.0 } else { folded }
}

/// Distance between two orientations on the doubled-angle circle, in `[0, 2]`.
fn orientation_distance(a: Real, b: Real) -> Real {
    1.0 - (2.0 * (a - b)).cos()
}

/// Relative-neighbourhood edges among the `k` nearest neighbours of each point.
///
/// Returns one sample per undirected edge, in ascending `(i, j)` index order.
pub fn neighbour_samples(points: &[Pt2], k: usize) -> Vec<AngleSample> {
    let mut edges = BTreeSet::new();
    for (i, p) in points.iter().enumerate() {
        let mut others: Vec<(Real, usize)> = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(j, q)| ((q - p).norm(), j))
            .collect();
        others.sort_by(|a, b| a.0.total_cmp(&b.0));
        for &(_, j) in others.iter().take(k) {
            edges.insert((i.min(j), i.max(j)));
        }
    }

    edges
        .into_iter()
        .filter(|&(i, j)| is_relative_neighbour(points, i, j))
        .map(|(i, j)| AngleSample::from_offset(&(points[j] - points[i])))
        .filter(|s| s.magnitude > 0.0)
        .collect()
}

fn is_relative_neighbour(points: &[Pt2], i: usize, j: usize) -> bool {
    let d = (points[j] - points[i]).norm();
    !points.iter().enumerate().any(|(r, pr)| {
        r != i && r != j && (pr - points[i]).norm().max((pr - points[j]).norm()) < d
    })
}

/// Two-cluster k-means on orientation.
///
/// Orientations are averaged on the doubled-angle circle so that directions
/// close to `0` and close to `pi` fall together. Initialisation is
/// deterministic: the first sample, and the sample farthest from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoMeansClusterer;

impl TwoMeansClusterer {
    /// Cluster centres, with the mean orientation and mean length of their members.
    pub fn cluster(&self, samples: &[AngleSample]) -> Result<[AngleSample; 2], GridAxesError> {
        if samples.len() < 2 {
            return Err(GridAxesError::NotEnoughSamples(samples.len()));
        }

        let first = samples[0].angle;
        let second = samples
            .iter()
            .map(|s| s.angle)
            .max_by(|a, b| {
                orientation_distance(first, *a).total_cmp(&orientation_distance(first, *b))
            })
            .unwrap_or(first);
        if orientation_distance(first, second) < 1e-12 {
            return Err(GridAxesError::SingleDirection);
        }

        let mut centres = [first, second];
        let mut labels = vec![usize::MAX; samples.len()];
        for _ in 0..MAX_ITERS {
            let mut changed = false;
            for (label, s) in labels.iter_mut().zip(samples) {
                let nearest = if orientation_distance(s.angle, centres[0])
                    <= orientation_distance(s.angle, centres[1])
                {
                    0
                } else {
                    1
                };
                changed |= *label != nearest;
                *label = nearest;
            }
            for (c, centre) in centres.iter_mut().enumerate() {
                if let Some(mean) = mean_orientation(samples, &labels, c) {
                    *centre = mean;
                }
            }
            if !changed {
                break;
            }
        }

        let mut out = [AngleSample {
            angle: 0.0,
            magnitude: 0.0,
        }; 2];
        for (c, slot) in out.iter_mut().enumerate() {
            let members: Vec<&AngleSample> = samples
                .iter()
                .zip(&labels)
                .filter(|&(_, &l)| l == c)
                .map(|(s, _)| s)
                .collect();
            if members.is_empty() {
                return Err(GridAxesError::SingleDirection);
            }
            *slot = AngleSample {
                angle: centres[c],
                magnitude: members.iter().map(|s| s.magnitude).sum::<Real>() / members.len() as Real,
            };
        }
        Ok(out)
    }
}

fn mean_orientation(samples: &[AngleSample], labels: &[usize], cluster: usize) -> Option<Real> {
    let (mut s, mut c, mut n) = (0.0, 0.0, 0usize);
    for (sample, _) in samples.iter().zip(labels).filter(|&(_, &l)| l == cluster) {
        s += (2.0 * sample.angle).sin();
        c += (2.0 * sample.angle).cos();
        n += 1;
    }
    if n == 0 || (s.abs() < 1e-15 && c.abs() < 1e-15) {
        return None;
    }
    Some(fold_angle(s.atan2(c) / 2.0))
}

/// Basis vectors from two cluster centres.
///
/// The more horizontal centre becomes axis A, oriented with `x >= 0`; the other
/// becomes axis B, oriented with `y >= 0`.
pub fn axes_from_centers(centers: &[AngleSample; 2]) -> (Vec2, Vec2) {
    let (h, v) = if centers[0].angle.cos().abs() >= centers[1].angle.cos().abs() {
        (centers[0], centers[1])
    } else {
        (centers[1], centers[0])
    };
    let mut a = h.to_vector();
    if a.x < 0.0 {
        a = -a;
    }
    let mut b = v.to_vector();
    if b.y < 0.0 {
        b = -b;
    }
    (a, b)
}

/// Lattice axes of `points` using `k` nearest neighbours per point.
pub fn estimate_grid_axes(points: &[Pt2], k: usize) -> Result<(Vec2, Vec2), GridAxesError> {
    let samples = neighbour_samples(points, k);
    let centers = TwoMeansClusterer.cluster(&samples)?;
    Ok(axes_from_centers(&centers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use laser_calibration_core::synthetic::lattice_pixels;

    fn points(theta: Real) -> (Vec<Pt2>, Vec2, Vec2) {
        let a = Vec2::new(theta.cos(), theta.sin()) * 32.0;
        let b = Vec2::new(-theta.sin(), theta.cos()) * 25.0;
        let pts = lattice_pixels(Pt2::new(200.0, 150.0), a, b, 6, 5)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        (pts, a, b)
    }

    #[test]
    fn diagonals_are_not_sampled() {
        let (pts, _, _) = points(0.0);
        let samples = neighbour_samples(&pts, 4);
        // 6x5 lattice: 5*5 horizontal plus 6*4 vertical edges.
        assert_eq!(samples.len(), 49);
        for s in &samples {
            let aligned = s.angle.abs() < 1e-9 || (s.angle - PI / 2.0).abs() < 1e-9;
            assert!(aligned, "unexpected edge angle {}", s.angle);
        }
    }

    #[test]
    fn recovers_rotated_axes() {
        for theta in [0.0, 0.25, -0.3] {
            let (pts, a, b) = points(theta);
            let (ea, eb) = estimate_grid_axes(&pts, 4).unwrap();
            assert!((ea - a).norm() < 1e-6, "axis A {ea} vs {a}");
            assert!((eb - b).norm() < 1e-6, "axis B {eb} vs {b}");
        }
    }

    #[test]
    fn orientation_wraps_at_pi() {
        let samples = [
            AngleSample {
                angle: 0.02,
                magnitude: 10.0,
            },
            AngleSample {
                angle: PI - 0.02,
                magnitude: 12.0,
            },
            AngleSample {
                angle: PI / 2.0,
                magnitude: 8.0,
            },
        ];
        let centers = TwoMeansClusterer.cluster(&samples).unwrap();
        let (a, b) = axes_from_centers(&centers);
        assert!(a.y.abs() < 1e-9 && (a.x - 11.0).abs() < 1e-9, "axis A {a}");
        assert!(b.x.abs() < 1e-9 && (b.y - 8.0).abs() < 1e-9, "axis B {b}");
    }

    #[test]
    fn rejects_degenerate_input() {
        assert_eq!(
            estimate_grid_axes(&[Pt2::new(1.0, 1.0)], 4),
            Err(GridAxesError::NotEnoughSamples(0))
        );
        let row: Vec<Pt2> = (0..5).map(|i| Pt2::new(i as Real * 10.0, 0.0)).collect();
        assert_eq!(
            estimate_grid_axes(&row, 4),
            Err(GridAxesError::SingleDirection)
        );
    }
}
