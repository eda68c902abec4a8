use laser_calibration_core::synthetic::sample_ray_field;
use laser_calibration_core::{CalibError, LaserRayField, RayIndex, RayObservation, Vec3};
use laser_calibration_optim::{
    NllsProblem, RayFieldBackend, RayFieldProblem, RayFieldSolveOptions, RobustLoss,
    refine_ray_field,
};
use nalgebra::DVector;

const DEPTHS: [f64; 4] = [300.0, 450.0, 600.0, 750.0];

fn ground_truth() -> LaserRayField {
    LaserRayField::new(
        6,
        5,
        0.04,
        Vec3::new(0.05, -0.1, 0.03),
        Vec3::new(120.0, -40.0, 15.0),
    )
    .unwrap()
}

fn perturbed(field: &LaserRayField) -> LaserRayField {
    field
        .with_params(
            field.alpha() * 0.8,
            field.rotation() + Vec3::new(0.03, -0.02, 0.04),
            field.translation() + Vec3::new(5.0, -5.0, 3.0),
        )
        .unwrap()
}

fn max_param_error(a: &LaserRayField, b: &LaserRayField) -> f64 {
    a.params()
        .iter()
        .zip(b.params())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[test]
fn recovers_ray_field_from_perturbed_guess() {
    let truth = ground_truth();
    let problem = RayFieldProblem::new(6, 5, sample_ray_field(&truth, &DEPTHS)).unwrap();

    let est = refine_ray_field(&problem, &perturbed(&truth), &RayFieldSolveOptions::default())
        .unwrap();

    let err = max_param_error(&est.field, &truth);
    assert!(err < 1e-4, "max parameter error {err}");
    assert!(est.report.final_cost < 1e-10, "cost {}", est.report.final_cost);
    assert!(est.report.converged, "{:?}", est.report);
    assert!(est.report.nonconvergence().is_none());
    assert!(est.stats.max < 1e-5, "max distance {}", est.stats.max);
    assert_eq!(est.stats.count, 6 * 5 * DEPTHS.len());

    let dirs = est.field.directions();
    assert_eq!(dirs.len(), 30);
    let ray = RayIndex::new(5, 4);
    let truth_dir = truth.direction(ray);
    assert!((dirs[4 * 6 + 5] - truth_dir).norm() < 1e-4);
}

#[test]
fn tiny_solver_backend_agrees() {
    let truth = ground_truth();
    let problem = RayFieldProblem::new(6, 5, sample_ray_field(&truth, &DEPTHS)).unwrap();
    let opts = RayFieldSolveOptions {
        backend: RayFieldBackend::TinySolver,
        ..RayFieldSolveOptions::default()
    };

    let initial = perturbed(&truth);
    let x0 = DVector::from_column_slice(&initial.params());
    let initial_cost = 0.5 * problem.residuals(&x0).norm_squared();
    let est = refine_ray_field(&problem, &initial, &opts).unwrap();
    assert!(est.report.converged, "{:?}", est.report);
    assert!(est.report.final_cost < initial_cost);
    assert!((est.field.alpha() - truth.alpha()).abs() < 1e-4);
    assert!((est.field.translation() - truth.translation()).norm() < 1e-2);
    assert!(est.stats.rms < 1e-2, "rms distance {}", est.stats.rms);
}

#[test]
fn robust_loss_limits_outlier_influence() {
    let truth = ground_truth();
    let mut observations = sample_ray_field(&truth, &DEPTHS);
    observations[7].point += Vec3::new(200.0, -150.0, 0.0);

    let problem = RayFieldProblem::new(6, 5, observations).unwrap();
    let initial = perturbed(&truth);

    let plain = refine_ray_field(&problem, &initial, &RayFieldSolveOptions::default()).unwrap();
    let robust = refine_ray_field(
        &problem,
        &initial,
        &RayFieldSolveOptions {
            robust_loss: RobustLoss::Huber { scale: 1.0 },
            ..RayFieldSolveOptions::default()
        },
    )
    .unwrap();

    let plain_err = (plain.field.translation() - truth.translation()).norm();
    let robust_err = (robust.field.translation() - truth.translation()).norm();
    assert!(
        robust_err < plain_err,
        "robust {robust_err} should beat plain {plain_err}"
    );
}

#[test]
fn rejects_unobservable_initial_guess() {
    let truth = ground_truth();
    let problem = RayFieldProblem::new(6, 5, sample_ray_field(&truth, &DEPTHS)).unwrap();
    // Parallel rays: the origin can slide along them and the roll is undefined.
    let flat = LaserRayField::new(6, 5, 0.0, Vec3::zeros(), Vec3::zeros()).unwrap();

    let err = refine_ray_field(&problem, &flat, &RayFieldSolveOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CalibError>(),
        Some(CalibError::MalformedInput(_))
    ));
}

#[test]
fn rejects_mismatched_field_size() {
    let truth = ground_truth();
    let observations: Vec<RayObservation> = sample_ray_field(&truth, &DEPTHS);
    let problem = RayFieldProblem::new(6, 5, observations).unwrap();
    let other = LaserRayField::new(4, 4, 0.04, Vec3::zeros(), Vec3::zeros()).unwrap();
    assert!(refine_ray_field(&problem, &other, &RayFieldSolveOptions::default()).is_err());
}
