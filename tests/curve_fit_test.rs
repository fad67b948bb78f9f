//! Curve fit engine against synthetic polarization data.

use polscan::analysis::{fit, FitModel, MetricPoint, ParameterBounds, PolarizationModel};
use polscan::data::artifact::{artifact_name, artifact_path, write_artifact};
use polscan::error::FitError;
use polscan::hardware::mock::MockSpectrometer;

const TRUTH: [f64; 3] = [50.0, 500.0, 30.0];

fn synthetic(model: &PolarizationModel) -> Vec<MetricPoint> {
    (0..36)
        .map(|i| {
            let angle = f64::from(i) * 10.0;
            MetricPoint::new(angle, model.evaluate(angle, &TRUTH))
        })
        .collect()
}

fn relative_error(value: f64, truth: f64) -> f64 {
    ((value - truth) / truth).abs()
}

#[test]
fn test_recovers_synthetic_parameters() {
    let model = PolarizationModel::new(3);
    let data = synthetic(&model);

    let result = fit(
        &model,
        &[40.0, 450.0, 28.0],
        &model.default_bounds(),
        &[false, false, false],
        &data,
    )
    .unwrap();

    assert!(result.success);
    let values = result.values();
    assert!(relative_error(values[0], 50.0) < 1e-3, "y0 = {}", values[0]);
    assert!(relative_error(values[1], 500.0) < 1e-3, "A = {}", values[1]);
    assert!(relative_error(values[2], 30.0) < 1e-3, "theta0 = {}", values[2]);
    assert!(result.residual_sum_of_squares < 1e-6);
    assert!(result.parameters.iter().all(|p| !p.fixed && p.std_error.is_finite()));
}

#[test]
fn test_data_driven_guess_finds_equivalent_phase() {
    let model = PolarizationModel::new(3);
    let data = synthetic(&model);
    let initial = model.initial_guess(&data);

    let result = fit(
        &model,
        &initial,
        &model.default_bounds(),
        &[false, false, false],
        &data,
    )
    .unwrap();

    // θ0 is only identifiable modulo the model period
    let values = result.values();
    assert!(relative_error(values[0], 50.0) < 1e-3);
    assert!(relative_error(values[1], 500.0) < 1e-3);
    let phase = (values[2] - TRUTH[2]).rem_euclid(model.period());
    assert!(phase.min(model.period() - phase) < 1e-3, "theta0 = {}", values[2]);
}

#[test]
fn test_fixed_theta0_reports_zero_error() {
    let model = PolarizationModel::new(3);
    let data = synthetic(&model);

    let result = fit(
        &model,
        &[40.0, 450.0, 30.0],
        &model.default_bounds(),
        &[false, false, true],
        &data,
    )
    .unwrap();

    let theta0 = result.parameter("theta0").unwrap();
    assert!(theta0.fixed);
    assert_eq!(theta0.value, 30.0);
    assert_eq!(theta0.std_error, 0.0);
    assert!(result.covariance[2].iter().all(|&c| c == 0.0));
    assert!(result.covariance.iter().all(|row| row[2] == 0.0));
    assert!(relative_error(result.parameter("y0").unwrap().value, 50.0) < 1e-3);
    assert!(relative_error(result.parameter("A").unwrap().value, 500.0) < 1e-3);
    assert!(result.summary().contains("theta0 = 30.0000 ± 0.0000 (fixed)"));
}

#[test]
fn test_insufficient_data() {
    let model = PolarizationModel::default();
    let data = vec![MetricPoint::new(0.0, 50.0), MetricPoint::new(10.0, 425.0)];
    let err = fit(
        &model,
        &[50.0, 500.0, 30.0],
        &model.default_bounds(),
        &[false, false, false],
        &data,
    )
    .unwrap_err();
    assert_eq!(err, FitError::InsufficientData { got: 2, required: 3 });
}

#[test]
fn test_all_parameters_fixed() {
    let model = PolarizationModel::default();
    let err = fit(
        &model,
        &TRUTH,
        &model.default_bounds(),
        &[true, true, true],
        &synthetic(&model),
    )
    .unwrap_err();
    assert_eq!(err, FitError::NoFreeParameters);
}

#[test]
fn test_amplitude_lower_bound_holds() {
    let model = PolarizationModel::default();
    // Flat data: the best amplitude is zero, never negative
    let data: Vec<_> = (0..12)
        .map(|i| MetricPoint::new(f64::from(i) * 7.5, 100.0))
        .collect();
    let result = fit(
        &model,
        &[90.0, 5.0, 10.0],
        &model.default_bounds(),
        &[false, false, false],
        &data,
    )
    .unwrap();
    assert!(result.parameter("A").unwrap().value >= 0.0);
    assert!((result.parameter("y0").unwrap().value - 100.0).abs() < 1e-3);
}

#[test]
fn test_custom_bounds_reject_infeasible_start() {
    let model = PolarizationModel::default();
    let bounds = vec![
        ParameterBounds::unbounded(),
        ParameterBounds::new(0.0, 100.0),
        ParameterBounds::new(-45.0, 45.0),
    ];
    let err = fit(
        &model,
        &[50.0, 500.0, 30.0],
        &bounds,
        &[false, false, false],
        &synthetic(&model),
    )
    .unwrap_err();
    assert!(matches!(err, FitError::InfeasibleStart { ref name, .. } if name == "A"));
}

#[test]
fn test_fit_from_saved_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let spectrometer = MockSpectrometer::new(dir.path());
    let paths: Vec<_> = (0..18)
        .map(|i| {
            let angle = f64::from(i) * 10.0;
            let path = artifact_path(dir.path(), &artifact_name("run", angle, true), "csv");
            write_artifact(&path, &spectrometer.synthesize(angle)).unwrap();
            path
        })
        .collect();

    let band = polscan::analysis::Band::new(605.0, 615.0).unwrap();
    let loaded = polscan::analysis::load_metric_dataset(&paths, &band).unwrap();
    assert_eq!(loaded.points.len(), 18);
    assert!(loaded.skipped.is_empty());

    let model = PolarizationModel::default();
    let result = fit(
        &model,
        &[55.0, 480.0, 29.0],
        &model.default_bounds(),
        &[false, false, false],
        &loaded.points,
    )
    .unwrap();
    assert!(relative_error(result.values()[0], 60.0) < 1e-3);
    assert!(relative_error(result.values()[1], 500.0) < 1e-3);
}
