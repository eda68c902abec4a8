//! Lattice-to-pixel correspondences and their per-image collection.
//!
//! A [`CorrespondenceSet`] is the output of one lattice matching run. Lattice
//! indices and pixel positions are stored pairwise, so the element-wise
//! alignment that downstream stages rely on holds by construction; the only
//! way to build a set from separate arrays is [`CorrespondenceSet::from_parts`],
//! which rejects mismatched lengths.

use crate::{CalibError, GridIndex, PatternKind, Pt2, Pt3};
use serde::{Deserialize, Serialize};

/// A lattice node paired with the pixel where it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Lattice coordinate.
    pub grid: GridIndex,
    /// Detected pixel position.
    pub pixel: Pt2,
    /// Optional 3D position, filled in once the point has been triangulated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<Pt3>,
}

impl Correspondence {
    pub fn new(grid: GridIndex, pixel: Pt2) -> Self {
        Self {
            grid,
            pixel,
            world: None,
        }
    }
}

/// Ordered correspondences from one matching run, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrespondenceSet {
    items: Vec<Correspondence>,
}

impl CorrespondenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from parallel lattice and pixel arrays.
    ///
    /// # Errors
    ///
    /// [`CalibError::MalformedInput`] if the arrays differ in length.
    pub fn from_parts(grid: Vec<GridIndex>, pixels: Vec<Pt2>) -> Result<Self, CalibError> {
        if grid.len() != pixels.len() {
            return Err(CalibError::malformed(format!(
                "lattice / pixel counts must match: {} vs {}",
                grid.len(),
                pixels.len()
            )));
        }
        Ok(grid
            .into_iter()
            .zip(pixels)
            .map(|(g, p)| Correspondence::new(g, p))
            .collect())
    }

    pub fn push(&mut self, grid: GridIndex, pixel: Pt2) {
        self.items.push(Correspondence::new(grid, pixel));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Correspondence> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Correspondence] {
        &self.items
    }

    pub fn grid_indices(&self) -> Vec<GridIndex> {
        self.items.iter().map(|c| c.grid).collect()
    }

    pub fn pixels(&self) -> Vec<Pt2> {
        self.items.iter().map(|c| c.pixel).collect()
    }

    /// Lattice nodes as planar points scaled by `spacing`.
    pub fn grid_points(&self, spacing: f64) -> Vec<Pt2> {
        self.items.iter().map(|c| c.grid.to_point(spacing)).collect()
    }

    /// 3D positions, if every correspondence has one.
    pub fn world_points(&self) -> Option<Vec<Pt3>> {
        self.items.iter().map(|c| c.world).collect()
    }

    /// Attach 3D positions element-wise.
    ///
    /// # Errors
    ///
    /// [`CalibError::MalformedInput`] if `world.len() != self.len()`.
    pub fn set_world_points(&mut self, world: &[Pt3]) -> Result<(), CalibError> {
        if world.len() != self.items.len() {
            return Err(CalibError::malformed(format!(
                "world / pixel counts must match: {} vs {}",
                world.len(),
                self.items.len()
            )));
        }
        for (c, w) in self.items.iter_mut().zip(world) {
            c.world = Some(*w);
        }
        Ok(())
    }

    /// Smallest lattice coordinate per axis, or `None` for an empty set.
    pub fn min_index(&self) -> Option<GridIndex> {
        self.items.iter().map(|c| c.grid).reduce(GridIndex::min)
    }

    /// Shift every lattice coordinate by `delta`.
    pub fn shifted(mut self, delta: GridIndex) -> Self {
        for c in &mut self.items {
            c.grid = c.grid + delta;
        }
        self
    }

    /// Same lattice coordinates with every pixel passed through `f`.
    pub fn map_pixels(&self, f: impl Fn(&Pt2) -> Pt2) -> Self {
        self.items
            .iter()
            .map(|c| Correspondence {
                pixel: f(&c.pixel),
                ..*c
            })
            .collect()
    }

    /// Shift lattice coordinates so the minimum per axis becomes zero.
    pub fn rebased(self) -> Self {
        match self.min_index() {
            Some(min) => self.shifted(GridIndex::new(-min.x, -min.y)),
            None => self,
        }
    }
}

impl FromIterator<Correspondence> for CorrespondenceSet {
    fn from_iter<I: IntoIterator<Item = Correspondence>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CorrespondenceSet {
    type Item = &'a Correspondence;
    type IntoIter = std::slice::Iter<'a, Correspondence>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Laser and board correspondences of one accepted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCorrespondences {
    /// Position of the image in the input sequence.
    pub image_index: usize,
    pub laser: CorrespondenceSet,
    pub board: CorrespondenceSet,
}

impl ImageCorrespondences {
    pub fn set(&self, pattern: PatternKind) -> &CorrespondenceSet {
        match pattern {
            PatternKind::Laser => &self.laser,
            PatternKind::Board => &self.board,
        }
    }
}

/// One [`ImageCorrespondences`] per accepted image, in processing order.
///
/// The collection only ever grows. [`CorrespondenceCollection::push`] refuses
/// images whose sets fall below the minimum size, so every stored image meets
/// it for both patterns. Lattice and pixel data are frozen once appended; only
/// the triangulated world positions are attached later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceCollection {
    min_correspondences: usize,
    images: Vec<ImageCorrespondences>,
}

impl CorrespondenceCollection {
    pub fn new(min_correspondences: usize) -> Self {
        Self {
            min_correspondences,
            images: Vec::new(),
        }
    }

    pub fn min_correspondences(&self) -> usize {
        self.min_correspondences
    }

    /// Check an image against the acceptance rule without storing it.
    pub fn check(&self, entry: &ImageCorrespondences) -> Result<(), CalibError> {
        for pattern in [PatternKind::Laser, PatternKind::Board] {
            let found = entry.set(pattern).len();
            if found < self.min_correspondences {
                return Err(CalibError::InsufficientCorrespondence {
                    pattern,
                    found,
                    required: self.min_correspondences,
                });
            }
        }
        if let Some(last) = self.images.last() {
            if entry.image_index <= last.image_index {
                return Err(CalibError::malformed(format!(
                    "image {} appended after image {}",
                    entry.image_index, last.image_index
                )));
            }
        }
        Ok(())
    }

    /// Append an accepted image.
    ///
    /// # Errors
    ///
    /// - [`CalibError::InsufficientCorrespondence`] if either pattern is below
    ///   the minimum,
    /// - [`CalibError::MalformedInput`] if images arrive out of order.
    pub fn push(&mut self, entry: ImageCorrespondences) -> Result<(), CalibError> {
        self.check(&entry)?;
        self.images.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[ImageCorrespondences] {
        &self.images
    }

    pub fn image_indices(&self) -> Vec<usize> {
        self.images.iter().map(|e| e.image_index).collect()
    }

    pub fn get(&self, image_index: usize) -> Option<&ImageCorrespondences> {
        self.images.iter().find(|e| e.image_index == image_index)
    }

    /// Attach triangulated laser points to the image at `image_index`.
    pub fn set_laser_world_points(
        &mut self,
        image_index: usize,
        world: &[Pt3],
    ) -> Result<(), CalibError> {
        let entry = self
            .images
            .iter_mut()
            .find(|e| e.image_index == image_index)
            .ok_or_else(|| CalibError::malformed(format!("image {image_index} not collected")))?;
        entry.laser.set_world_points(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_set(n: i32, origin: GridIndex) -> CorrespondenceSet {
        let mut set = CorrespondenceSet::new();
        for y in 0..n {
            for x in 0..n {
                set.push(
                    origin.offset(x, y),
                    Pt2::new(10.0 * x as f64, 10.0 * y as f64),
                );
            }
        }
        set
    }

    #[test]
    fn from_parts_rejects_mismatched_lengths() {
        let err = CorrespondenceSet::from_parts(
            vec![GridIndex::new(0, 0), GridIndex::new(1, 0)],
            vec![Pt2::new(0.0, 0.0)],
        )
        .unwrap_err();
        assert!(matches!(err, CalibError::MalformedInput(_)));
        assert!(err.to_string().contains("2 vs 1"));
    }

    #[test]
    fn rebase_moves_minimum_to_zero() {
        let set = square_set(3, GridIndex::new(-2, 5)).rebased();
        assert_eq!(set.min_index(), Some(GridIndex::new(0, 0)));
        assert_eq!(set.as_slice()[8].grid, GridIndex::new(2, 2));
        assert_eq!(CorrespondenceSet::new().rebased().len(), 0);
    }

    #[test]
    fn map_pixels_keeps_lattice_and_order() {
        let set = square_set(2, GridIndex::new(1, 1));
        let moved = set.map_pixels(|p| Pt2::new(p.x + 0.5, 2.0 * p.y));
        assert_eq!(moved.grid_indices(), set.grid_indices());
        assert_eq!(moved.as_slice()[3].pixel, Pt2::new(10.5, 20.0));
    }

    #[test]
    fn collection_refuses_small_images() {
        let mut collection = CorrespondenceCollection::new(15);
        let ok = ImageCorrespondences {
            image_index: 0,
            laser: square_set(4, GridIndex::default()),
            board: square_set(5, GridIndex::default()),
        };
        collection.push(ok).unwrap();

        let small = ImageCorrespondences {
            image_index: 1,
            laser: square_set(3, GridIndex::default()),
            board: square_set(5, GridIndex::default()),
        };
        let err = collection.push(small).unwrap_err();
        assert_eq!(
            err,
            CalibError::InsufficientCorrespondence {
                pattern: PatternKind::Laser,
                found: 9,
                required: 15
            }
        );
        assert_eq!(collection.image_indices(), vec![0]);
        for entry in collection.images() {
            assert_eq!(entry.laser.grid_indices().len(), entry.laser.pixels().len());
        }
    }

    #[test]
    fn world_points_attach_to_laser_set() {
        let mut collection = CorrespondenceCollection::new(1);
        collection
            .push(ImageCorrespondences {
                image_index: 3,
                laser: square_set(2, GridIndex::default()),
                board: square_set(2, GridIndex::default()),
            })
            .unwrap();
        assert!(collection.get(3).unwrap().laser.world_points().is_none());

        let world = vec![Pt3::new(0.0, 0.0, 1.0); 4];
        collection.set_laser_world_points(3, &world).unwrap();
        assert_eq!(collection.get(3).unwrap().laser.world_points(), Some(world));
        assert!(collection.set_laser_world_points(3, &[]).is_err());
        assert!(collection.set_laser_world_points(7, &[]).is_err());
    }

    #[test]
    fn collection_serde_roundtrip() {
        let mut collection = CorrespondenceCollection::new(4);
        collection
            .push(ImageCorrespondences {
                image_index: 0,
                laser: square_set(2, GridIndex::default()),
                board: square_set(2, GridIndex::new(1, 1)),
            })
            .unwrap();
        let json = serde_json::to_string(&collection).unwrap();
        let back: CorrespondenceCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, collection);
    }
}
