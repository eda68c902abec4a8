//! Orchestration of a laser ray-field calibration.
//!
//! A run walks through four stages, each exposed on its own so callers can
//! inspect or replace intermediate results:
//!
//! 1. [`LaserGeometryEstimator::collect`]: detect and match both patterns in
//!    every image and keep the images that pass the correspondence check.
//! 2. [`LaserGeometryEstimator::board_views`]: board homography and pose of
//!    every accepted image.
//! 3. [`LaserGeometryEstimator::triangulate`]: laser dots onto the board
//!    plane, in camera coordinates.
//! 4. [`LaserGeometryEstimator::initialize`] and
//!    [`LaserGeometryEstimator::refine`]: per-ray lines, common origin,
//!    initial orientation and the joint non-linear fit.
//!
//! Images are processed strictly in order and an image only enters the
//! [`CorrespondenceCollection`] once both of its patterns are matched.

use crate::collaborators::{
    DltRansacHomography, ExtrinsicEstimator, FeatureExtractor, HomographyEstimator,
    LatticeCorrection, NoCorrection, OrientationClusterer, PlanarPoseExtrinsics,
};
use crate::config::LaserCalibrationConfig;
use crate::report::{BoardView, LaserCalibrationReport, LaserCalibrationResult, SkippedImage};
use anyhow::{Context, Result, bail, ensure};
use laser_calibration_core::{
    CalibError, CameraModel, CorrespondenceCollection, CorrespondenceSet, ImageCorrespondences,
    LaserRayField, PatternKind, Pt2, Pt3, RayLine, RayObservation, Real, Vec3,
};
use laser_calibration_linear::{
    GridMatcher, PlanarHomography, TwoMeansClusterer, axes_from_centers, estimate_ray_origin,
    fit_rays, initial_orientation, mean_transfer_error, neighbour_samples, triangulate_laser_set,
};
use laser_calibration_optim::{RayFieldEstimate, RayFieldProblem, refine_ray_field};
use log::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Stage outputs
// ─────────────────────────────────────────────────────────────────────────────

/// Accepted images and the ones left out.
#[derive(Debug, Clone)]
pub struct Collected {
    pub collection: CorrespondenceCollection,
    pub skipped: Vec<SkippedImage>,
}

/// Laser points of all accepted images in camera coordinates.
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    pub observations: Vec<RayObservation>,
    /// Observations dropped for a ray index outside the configured field.
    pub out_of_field: usize,
    /// Images where some laser pixel mapped to the board's horizon; their
    /// correspondences carry no world points.
    pub incomplete_images: Vec<usize>,
}

/// Closed-form starting point of the refinement.
#[derive(Debug, Clone)]
pub struct Initialization {
    pub lines: Vec<RayLine>,
    pub degenerate_rays: Vec<CalibError>,
    pub origin: Pt3,
    pub field: LaserRayField,
}

// ─────────────────────────────────────────────────────────────────────────────
// Estimator
// ─────────────────────────────────────────────────────────────────────────────

/// Calibrates a laser ray field against a camera with known intrinsics.
pub struct LaserGeometryEstimator {
    camera: CameraModel,
    config: LaserCalibrationConfig,
    homography: Box<dyn HomographyEstimator>,
    extrinsics: Box<dyn ExtrinsicEstimator>,
    clusterer: Box<dyn OrientationClusterer>,
    correction: Box<dyn LatticeCorrection>,
}

impl LaserGeometryEstimator {
    /// Estimator with the default collaborators.
    ///
    /// # Errors
    ///
    /// Invalid configuration values.
    pub fn new(camera: CameraModel, config: LaserCalibrationConfig) -> Result<Self> {
        config.validate().context("invalid laser calibration config")?;
        let homography = DltRansacHomography {
            ransac: config.homography_ransac,
        };
        Ok(Self {
            camera,
            homography: Box::new(homography),
            extrinsics: Box::new(PlanarPoseExtrinsics { homography }),
            clusterer: Box::new(TwoMeansClusterer),
            correction: Box::new(NoCorrection),
            config,
        })
    }

    pub fn with_homography_estimator(
        mut self,
        estimator: impl HomographyEstimator + 'static,
    ) -> Self {
        self.homography = Box::new(estimator);
        self
    }

    pub fn with_extrinsic_estimator(
        mut self,
        estimator: impl ExtrinsicEstimator + 'static,
    ) -> Self {
        self.extrinsics = Box::new(estimator);
        self
    }

    pub fn with_clusterer(mut self, clusterer: impl OrientationClusterer + 'static) -> Self {
        self.clusterer = Box::new(clusterer);
        self
    }

    pub fn with_correction(mut self, correction: impl LatticeCorrection + 'static) -> Self {
        self.correction = Box::new(correction);
        self
    }

    pub fn config(&self) -> &LaserCalibrationConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Lattice correspondences of one unordered point set.
    ///
    /// The lattice axes come from clustering neighbour offsets. When no two
    /// directions can be found the set is empty, which the correspondence
    /// check then rejects.
    pub fn match_lattice(&self, points: &[Pt2]) -> CorrespondenceSet {
        let samples = neighbour_samples(points, self.config.neighbour_count);
        let centers = match self.clusterer.cluster(&samples) {
            Ok(centers) => centers,
            Err(err) => {
                debug!("no lattice axes among {} points: {err:#}", points.len());
                return CorrespondenceSet::new();
            }
        };
        let (axis_a, axis_b) = axes_from_centers(&centers);
        debug!(
            "lattice axes a = ({:.2}, {:.2}), b = ({:.2}, {:.2})",
            axis_a.x, axis_a.y, axis_b.x, axis_b.y
        );
        GridMatcher::new(axis_a, axis_b, self.config.matcher_opts()).match_points(points)
    }

    fn detect<E: FeatureExtractor>(
        &self,
        extractor: &E,
        image: &E::Image,
        image_index: usize,
        pattern: PatternKind,
    ) -> Result<CorrespondenceSet> {
        let points = extractor
            .extract(image, pattern, self.config.sensitivity(pattern))
            .with_context(|| {
                format!("{pattern} feature extraction failed for image {image_index}")
            })?;
        let matched = self.match_lattice(&points);
        debug!(
            "image {image_index}: {}/{} {pattern} points on the lattice",
            matched.len(),
            points.len()
        );
        Ok(self.correction.correct(image_index, pattern, matched))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stages
    // ─────────────────────────────────────────────────────────────────────────

    /// Detect, match and check both patterns in every image.
    ///
    /// # Errors
    ///
    /// [`CalibError::MalformedInput`] for an empty image set; extractor
    /// failures. Images below the correspondence minimum are skipped, not
    /// errors.
    pub fn collect<E: FeatureExtractor>(
        &self,
        images: &[E::Image],
        extractor: &E,
    ) -> Result<Collected> {
        if images.is_empty() {
            return Err(CalibError::malformed("empty image set").into());
        }

        let mut collection = CorrespondenceCollection::new(self.config.min_correspondences);
        let mut skipped = Vec::new();
        for (image_index, image) in images.iter().enumerate() {
            let entry = ImageCorrespondences {
                image_index,
                laser: self.detect(extractor, image, image_index, PatternKind::Laser)?,
                board: self.detect(extractor, image, image_index, PatternKind::Board)?,
            };
            match collection.push(entry) {
                Ok(()) => debug!("image {image_index} accepted"),
                Err(err) if !err.is_fatal() => {
                    warn!("image {image_index} skipped: {err}");
                    skipped.push(SkippedImage {
                        image_index,
                        reason: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(
            "{} of {} images accepted for laser calibration",
            collection.len(),
            images.len()
        );
        Ok(Collected {
            collection,
            skipped,
        })
    }

    /// Board homography and pose of every collected image.
    ///
    /// Board pixels are undistorted first, so the homography maps the board
    /// plane to ideal pinhole pixels.
    pub fn board_views(&self, collection: &CorrespondenceCollection) -> Result<Vec<BoardView>> {
        let square = self.config.board_square_size;
        collection
            .images()
            .iter()
            .map(|entry| {
                let image_index = entry.image_index;
                let plane = entry.board.grid_points(square);
                let raw = entry.board.pixels();
                let pixels = self.camera.undistort_pixels(&raw);
                let homography = self
                    .homography
                    .estimate(&plane, &pixels)
                    .with_context(|| format!("board homography for image {image_index}"))?;
                let board: Vec<Pt3> = plane.iter().map(|p| Pt3::new(p.x, p.y, 0.0)).collect();
                let pose = self
                    .extrinsics
                    .estimate_with_homography(&self.camera, &board, &raw, &homography)
                    .with_context(|| format!("board pose for image {image_index}"))?;
                let k = self.camera.intrinsics.k_matrix();
                debug!(
                    "image {image_index}: board at distance {:.1}, transfer error {:.3} px",
                    pose.translation.vector.norm(),
                    mean_transfer_error(&k, &pose, &plane, &pixels)
                );
                Ok(BoardView {
                    image_index,
                    homography,
                    pose,
                })
            })
            .collect()
    }

    /// Triangulate every laser correspondence onto its board plane.
    ///
    /// Laser pixels are undistorted with the camera model first. Triangulated
    /// points are attached to the laser correspondences of `collection` when
    /// every point of an image could be triangulated. Observations whose ray
    /// index lies outside the configured field are dropped and counted.
    pub fn triangulate(
        &self,
        collection: &mut CorrespondenceCollection,
        views: &[BoardView],
    ) -> Result<Triangulation> {
        let (width, height) = (self.config.ray_field_width, self.config.ray_field_height);
        let in_field = |o: &RayObservation| {
            o.ray.x >= 0
                && o.ray.y >= 0
                && (o.ray.x as usize) < width
                && (o.ray.y as usize) < height
        };

        let mut out = Triangulation::default();
        for view in views {
            let image_index = view.image_index;
            let homography = PlanarHomography::new(view.homography)
                .with_context(|| format!("board homography of image {image_index}"))?;
            let laser = collection
                .get(image_index)
                .with_context(|| format!("image {image_index} was not collected"))?
                .laser
                .map_pixels(|p| self.camera.undistort_pixel(p));
            let hits = triangulate_laser_set(&homography, &view.pose, &laser, image_index);
            if hits.len() == laser.len() {
                let points: Vec<Pt3> = hits.iter().map(|o| o.point).collect();
                collection.set_laser_world_points(image_index, &points)?;
            } else {
                warn!(
                    "image {image_index}: {} of {} laser points could not be triangulated",
                    laser.len() - hits.len(),
                    laser.len()
                );
                out.incomplete_images.push(image_index);
            }

            let before = out.observations.len();
            for hit in hits {
                if in_field(&hit) {
                    out.observations.push(hit);
                } else {
                    out.out_of_field += 1;
                }
            }
            debug!(
                "image {image_index}: {} laser points triangulated",
                out.observations.len() - before
            );
        }
        if out.out_of_field > 0 {
            warn!(
                "{} laser points lie outside the {width}x{height} ray field",
                out.out_of_field
            );
        }
        Ok(out)
    }

    /// Line fits, common origin and the initial field.
    ///
    /// The initial rotation turns the configured forward axis onto the vector
    /// from the origin to the centroid of all hits.
    pub fn initialize(&self, observations: &[RayObservation]) -> Result<Initialization> {
        ensure!(!observations.is_empty(), "no laser points were triangulated");
        let (lines, degenerate_rays) = fit_rays(observations);
        for err in &degenerate_rays {
            debug!("{err}");
        }
        let origin = estimate_ray_origin(&lines).context("laser origin estimation")?;
        info!(
            "laser origin from {} rays: ({:.3}, {:.3}, {:.3})",
            lines.len(),
            origin.x,
            origin.y,
            origin.z
        );

        let centroid = observations
            .iter()
            .fold(Vec3::zeros(), |acc, o| acc + o.point.coords)
            / observations.len() as Real;
        let rotation = initial_orientation(&(centroid - origin.coords), &self.config.forward_axis);
        let field = LaserRayField::new(
            self.config.ray_field_width,
            self.config.ray_field_height,
            self.config.initial_alpha,
            rotation,
            origin.coords,
        )?;
        Ok(Initialization {
            lines,
            degenerate_rays,
            origin,
            field,
        })
    }

    /// Joint fit of the ray field to all observations.
    pub fn refine(
        &self,
        observations: &[RayObservation],
        initial: &LaserRayField,
    ) -> Result<RayFieldEstimate> {
        let problem = RayFieldProblem::new(
            self.config.ray_field_width,
            self.config.ray_field_height,
            observations.to_vec(),
        )?;
        refine_ray_field(&problem, initial, &self.config.solve_opts())
            .context("ray field refinement")
    }

    /// Run every stage on `images`.
    ///
    /// # Errors
    ///
    /// - [`CalibError::MalformedInput`] for an empty image set or an
    ///   underdetermined refinement,
    /// - no image passing the correspondence check,
    /// - failures of the collaborators or the closed-form stages.
    ///
    /// A solver that stops on its iteration cap is not an error; see
    /// [`LaserCalibrationResult::converged`].
    pub fn run<E: FeatureExtractor>(
        &self,
        images: &[E::Image],
        extractor: &E,
    ) -> Result<LaserCalibrationResult> {
        info!("laser calibration on {} images", images.len());
        if !self.camera.is_pinhole() {
            let d = &self.camera.distortion;
            info!(
                "undistorting pixels: k ({:.3e}, {:.3e}, {:.3e}), p ({:.3e}, {:.3e})",
                d.k1, d.k2, d.k3, d.p1, d.p2
            );
        }
        let Collected {
            mut collection,
            skipped,
        } = self.collect(images, extractor)?;
        if collection.is_empty() {
            bail!(
                "no image has {} laser and board correspondences ({} skipped)",
                self.config.min_correspondences,
                skipped.len()
            );
        }

        let views = self.board_views(&collection)?;
        let Triangulation {
            observations,
            out_of_field,
            incomplete_images,
        } = self.triangulate(&mut collection, &views)?;
        let init = self.initialize(&observations)?;
        let estimate = self.refine(&observations, &init.field)?;

        let field = estimate.field;
        info!(
            "laser field: alpha {:.6}, rotation ({:.4}, {:.4}, {:.4}), origin ({:.3}, {:.3}, {:.3}), rms {:.3e}",
            field.alpha(),
            field.rotation().x,
            field.rotation().y,
            field.rotation().z,
            field.translation().x,
            field.translation().y,
            field.translation().z,
            estimate.stats.rms
        );

        let report = LaserCalibrationReport {
            accepted_images: collection.image_indices(),
            skipped_images: skipped,
            board_views: views,
            out_of_field,
            incomplete_images,
            degenerate_rays: init.degenerate_rays,
            lines: init.lines,
            origin: init.origin,
            initial_rotation: init.field.rotation(),
            initial_alpha: init.field.alpha(),
            solve: estimate.report,
            stats: estimate.stats,
        };
        Ok(LaserCalibrationResult {
            field,
            collection,
            observations,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SensitivityParams;
    use laser_calibration_core::{
        Correspondence, GridIndex, Iso3, Mat3, PinholeIntrinsics, Vec2, synthetic::lattice_pixels,
    };

    struct Fixed(Vec<Pt2>);

    impl FeatureExtractor for Fixed {
        type Image = ();

        fn extract(&self, _: &(), _: PatternKind, _: &SensitivityParams) -> Result<Vec<Pt2>> {
            Ok(self.0.clone())
        }
    }

    fn estimator(config: LaserCalibrationConfig) -> LaserGeometryEstimator {
        let camera = CameraModel::pinhole(PinholeIntrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 640.0,
            cy: 480.0,
            skew: 0.0,
        });
        LaserGeometryEstimator::new(camera, config).unwrap()
    }

    fn grid(nx: usize, ny: usize) -> Vec<Pt2> {
        lattice_pixels(
            Pt2::new(300.0, 200.0),
            Vec2::new(30.0, 2.0),
            Vec2::new(-2.0, 28.0),
            nx,
            ny,
        )
        .into_iter()
        .map(|(_, p)| p)
        .collect()
    }

    #[test]
    fn matches_a_lattice_and_skips_sparse_images() {
        let est = estimator(LaserCalibrationConfig::default());
        let matched = est.match_lattice(&grid(5, 4));
        assert_eq!(matched.len(), 20);
        assert_eq!(matched.min_index(), Some(GridIndex::new(0, 0)));

        let collected = est.collect(&[(), ()], &Fixed(grid(4, 3))).unwrap();
        assert!(collected.collection.is_empty());
        assert_eq!(collected.skipped.len(), 2);
        assert_eq!(
            collected.skipped[1].reason,
            CalibError::InsufficientCorrespondence {
                pattern: PatternKind::Laser,
                found: 12,
                required: 15,
            }
        );
        assert!(est.run(&[()], &Fixed(grid(4, 3))).is_err());
    }

    #[test]
    fn collinear_points_yield_an_empty_lattice() {
        let est = estimator(LaserCalibrationConfig::default());
        let line: Vec<Pt2> = (0..10).map(|i| Pt2::new(10.0 * i as Real, 5.0)).collect();
        assert!(est.match_lattice(&line).is_empty());
        assert!(est.match_lattice(&[]).is_empty());
    }

    #[test]
    fn partially_triangulated_images_are_reported() {
        let est = estimator(LaserCalibrationConfig::default());
        let set = |pixels: &[(Real, Real)]| -> CorrespondenceSet {
            pixels
                .iter()
                .enumerate()
                .map(|(i, &(u, v))| {
                    Correspondence::new(GridIndex::new(i as i32, 0), Pt2::new(u, v))
                })
                .collect()
        };
        let mut collection = CorrespondenceCollection::new(2);
        collection
            .push(ImageCorrespondences {
                image_index: 0,
                // (-2, 5) lies on the horizon of the board plane below.
                laser: set(&[(-2.0, 5.0), (3.0, 5.0), (8.0, 5.0)]),
                board: set(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]),
            })
            .unwrap();
        let views = [BoardView {
            image_index: 0,
            homography: Mat3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.5, 0.0, 1.0),
            pose: Iso3::identity(),
        }];

        let out = est.triangulate(&mut collection, &views).unwrap();
        assert_eq!(out.observations.len(), 2);
        assert_eq!(out.out_of_field, 0);
        assert_eq!(out.incomplete_images, vec![0]);
        assert!((out.observations[0].point - Pt3::new(1.2, 2.0, 0.0)).norm() < 1e-12);
        assert!(collection.get(0).unwrap().laser.world_points().is_none());
    }

    #[test]
    fn rejects_empty_image_set_and_bad_config() {
        let est = estimator(LaserCalibrationConfig::default());
        let err = est.collect(&[], &Fixed(Vec::new())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CalibError>(),
            Some(CalibError::MalformedInput(_))
        ));

        let camera = est.camera().clone();
        let config = LaserCalibrationConfig {
            neighbour_count: 0,
            ..Default::default()
        };
        assert!(LaserGeometryEstimator::new(camera, config).is_err());
    }
}
