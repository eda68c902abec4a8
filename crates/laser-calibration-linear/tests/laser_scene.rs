use laser_calibration_core::synthetic::{
    board_points, board_pose, project_board, ray_board_intersection,
};
use laser_calibration_core::{
    CorrespondenceSet, GridIndex, Iso3, LaserRayField, PinholeIntrinsics, Pt2, RayIndex,
    RansacOptions, Vec3,
};
use laser_calibration_linear::{
    GridMatcher, GridMatcherOptions, PlanarHomography, dlt_homography_ransac,
    estimate_grid_axes, estimate_planar_pose_from_h, estimate_ray_origin, fit_rays,
    initial_orientation, triangulate_laser_set,
};

const SQUARE: f64 = 30.0;

fn intrinsics() -> PinholeIntrinsics {
    PinholeIntrinsics {
        fx: 800.0,
        fy: 800.0,
        cx: 640.0,
        cy: 480.0,
        skew: 0.0,
    }
}

fn field() -> LaserRayField {
    LaserRayField::new(
        4,
        3,
        0.05,
        Vec3::new(0.02, -0.25, 0.01),
        Vec3::new(150.0, -30.0, 10.0),
    )
    .unwrap()
}

fn poses() -> Vec<Iso3> {
    vec![
        board_pose([0.1, -0.1, 0.05], Vec3::new(-60.0, -60.0, 500.0)),
        board_pose([-0.15, 0.2, -0.1], Vec3::new(-40.0, -80.0, 600.0)),
        board_pose([0.2, 0.15, 0.0], Vec3::new(-80.0, -40.0, 700.0)),
        board_pose([-0.1, -0.2, 0.1], Vec3::new(-50.0, -50.0, 800.0)),
    ]
}

/// Laser dot pixels of every ray on the board at `pose`, with their true ray index.
fn laser_dots(field: &LaserRayField, pose: &Iso3) -> Vec<(RayIndex, Pt2)> {
    let k = intrinsics();
    let mut out = Vec::new();
    for y in 0..field.height() as i32 {
        for x in 0..field.width() as i32 {
            let ray = RayIndex::new(x, y);
            let hit = ray_board_intersection(field, ray, pose).unwrap();
            out.push((ray, k.project(&hit).unwrap()));
        }
    }
    out
}

fn match_dots(dots: &[(RayIndex, Pt2)]) -> CorrespondenceSet {
    let pixels: Vec<Pt2> = dots.iter().map(|(_, p)| *p).collect();
    let (a, b) = estimate_grid_axes(&pixels, 4).unwrap();
    GridMatcher::new(a, b, GridMatcherOptions::default()).match_points(&pixels)
}

#[test]
fn laser_dots_match_their_ray_indices() {
    let field = field();
    for pose in poses() {
        let dots = laser_dots(&field, &pose);
        let matched = match_dots(&dots);
        assert_eq!(matched.len(), dots.len());
        for c in &matched {
            let (ray, _) = dots
                .iter()
                .find(|(_, p)| (p - c.pixel).norm() < 1e-9)
                .unwrap();
            assert_eq!(c.grid, *ray);
        }
    }
}

#[test]
fn triangulated_rays_meet_at_laser_origin() {
    let field = field();
    let k = intrinsics();
    let board = board_points(5, 5, SQUARE);

    let mut observations = Vec::new();
    for (image_index, pose) in poses().iter().enumerate() {
        let corners = project_board(&k, pose, &board);
        let grid: Vec<Pt2> = corners.iter().map(|(g, _)| g.to_point(SQUARE)).collect();
        let pixels: Vec<Pt2> = corners.iter().map(|(_, p)| *p).collect();
        let (h, inliers) = dlt_homography_ransac(&grid, &pixels, &RansacOptions::default()).unwrap();
        assert_eq!(inliers.len(), 25);

        let homography = PlanarHomography::new(h).unwrap();
        let est_pose = estimate_planar_pose_from_h(&k.k_matrix(), &h).unwrap();
        assert!((est_pose.translation.vector - pose.translation.vector).norm() < 1e-6);

        let laser = match_dots(&laser_dots(&field, pose));
        observations.extend(triangulate_laser_set(&homography, &est_pose, &laser, image_index));
    }
    assert_eq!(observations.len(), 4 * 12);

    let (lines, degenerate) = fit_rays(&observations);
    assert!(degenerate.is_empty());
    assert_eq!(lines.len(), 12);
    assert_eq!(lines[0].ray, GridIndex::new(0, 0));
    for line in &lines {
        assert!(line.rms < 1e-6, "ray {} rms {}", line.ray, line.rms);
        let truth = field.direction(line.ray).normalize();
        assert!((line.direction - truth).norm() < 1e-6);
    }

    let origin = estimate_ray_origin(&lines).unwrap();
    assert!(
        (origin - field.origin()).norm() < 1e-4,
        "origin {origin} vs {}",
        field.origin()
    );

    // The mean hit direction is close to the field's central ray.
    let centroid = observations.iter().fold(Vec3::zeros(), |acc, o| acc + o.point.coords)
        / observations.len() as f64;
    let rvec = initial_orientation(&(centroid - origin.coords), &Vec3::z());
    assert!((rvec - field.rotation()).norm() < 0.1, "initial rotation {rvec}");
}
