//! Nonlinear least-squares curve fitting with fixed-parameter support.
//!
//! Fixing a parameter partitions the parameter indices into a free set and a
//! fixed set. The solver (a bounded Levenberg–Marquardt) only sees the reduced
//! vector of free parameters; the full vector and covariance are rebuilt after
//! convergence.
//!
//! # Fixed-parameter errors
//!
//! A fixed parameter reports a standard error of exactly `0.0`, and its row and
//! column of the covariance matrix are zero.
//!
//! # Example
//!
//! ```rust,ignore
//! let model = PolarizationModel::new(3);
//! let result = fit(
//!     &model,
//!     &[40.0, 450.0, 28.0],
//!     &model.default_bounds(),
//!     &[false, false, false],
//!     &points,
//! )?;
//! println!("{}", result.summary());
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::dataset::MetricPoint;
use super::model::{FitModel, ParameterBounds};
use crate::config::FitSettings;
use crate::error::FitError;

/// Fewest points a fit accepts.
pub const MIN_FIT_POINTS: usize = 3;

/// One parameter of a fit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    /// Parameter name
    pub name: String,
    /// Optimized (or fixed) value
    pub value: f64,
    /// One-sigma standard error; `0.0` for fixed parameters
    pub std_error: f64,
    /// Held constant during the fit
    pub fixed: bool,
}

/// Outcome of one fit invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Model identifier
    pub model: String,
    /// Parameters in model order
    pub parameters: Vec<FittedParameter>,
    /// Full covariance matrix, fixed rows/columns zero
    pub covariance: Vec<Vec<f64>>,
    /// Model evaluated on an even grid spanning the data's angle range
    pub curve: Vec<MetricPoint>,
    /// Sum of squared residuals at the solution
    pub residual_sum_of_squares: f64,
    /// Solver iterations used
    pub iterations: usize,
    /// Whether the fit converged
    pub success: bool,
    /// Human-readable status
    pub message: String,
}

impl FitResult {
    /// Look a parameter up by name.
    pub fn parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameter values in model order.
    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// `name = value ± error` lines.
    pub fn summary(&self) -> String {
        let mut text = format!("{}\nParameters:\n", self.message);
        for p in &self.parameters {
            let marker = if p.fixed { " (fixed)" } else { "" };
            text.push_str(&format!(
                "  {} = {:.4} ± {:.4}{}\n",
                p.name, p.value, p.std_error, marker
            ));
        }
        text
    }
}

/// Split of parameter indices into free and fixed sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPartition {
    free: Vec<usize>,
    fixed: Vec<usize>,
}

impl ParameterPartition {
    /// Partition from a mask where `true` marks a fixed parameter.
    pub fn from_mask(fixed_mask: &[bool]) -> Self {
        let (fixed, free): (Vec<usize>, Vec<usize>) =
            (0..fixed_mask.len()).partition(|&i| fixed_mask[i]);
        Self { free, fixed }
    }

    /// Indices optimized by the solver.
    pub fn free(&self) -> &[usize] {
        &self.free
    }

    /// Indices held constant.
    pub fn fixed(&self) -> &[usize] {
        &self.fixed
    }

    /// Total parameter count.
    pub fn len(&self) -> usize {
        self.free.len() + self.fixed.len()
    }

    /// Returns true if the partition holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the free entries out of a full vector.
    pub fn reduce<T: Copy>(&self, full: &[T]) -> Vec<T> {
        self.free.iter().map(|&i| full[i]).collect()
    }

    /// Overwrite the free entries of `template` with `reduced`.
    pub fn expand(&self, reduced: &[f64], template: &[f64]) -> Vec<f64> {
        let mut full = template.to_vec();
        for (slot, &i) in self.free.iter().enumerate() {
            full[i] = reduced[slot];
        }
        full
    }

    /// Embed a reduced covariance into the full parameter space.
    pub fn expand_covariance(&self, reduced: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.len();
        let mut full = DMatrix::zeros(n, n);
        for (a, &i) in self.free.iter().enumerate() {
            for (b, &j) in self.free.iter().enumerate() {
                full[(i, j)] = reduced[(a, b)];
            }
        }
        full
    }
}

/// Bounded Levenberg–Marquardt solver settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveFitter {
    /// Outer iteration cap
    pub max_iterations: usize,
    /// Relative cost reduction that counts as converged
    pub ftol: f64,
    /// Relative step size that counts as converged
    pub xtol: f64,
    /// Points in the reported fitted curve
    pub curve_samples: usize,
}

impl Default for CurveFitter {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            ftol: 1e-12,
            xtol: 1e-12,
            curve_samples: 200,
        }
    }
}

impl From<&FitSettings> for CurveFitter {
    fn from(settings: &FitSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            ..Self::default()
        }
    }
}

const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Fit `data` with the default solver settings.
pub fn fit(
    model: &dyn FitModel,
    initial: &[f64],
    bounds: &[ParameterBounds],
    fixed_mask: &[bool],
    data: &[MetricPoint],
) -> Result<FitResult, FitError> {
    CurveFitter::default().fit(model, initial, bounds, fixed_mask, data)
}

/// Least-squares problem restricted to the free parameters.
struct ReducedProblem<'a> {
    model: &'a dyn FitModel,
    data: &'a [MetricPoint],
    partition: &'a ParameterPartition,
    template: &'a [f64],
    bounds: Vec<ParameterBounds>,
}

impl ReducedProblem<'_> {
    fn full(&self, reduced: &DVector<f64>) -> Vec<f64> {
        self.partition.expand(reduced.as_slice(), self.template)
    }

    /// Observed minus model.
    fn residuals(&self, reduced: &DVector<f64>) -> DVector<f64> {
        let params = self.full(reduced);
        DVector::from_iterator(
            self.data.len(),
            self.data
                .iter()
                .map(|p| p.value - self.model.evaluate(p.angle, &params)),
        )
    }

    /// Central-difference Jacobian of the model w.r.t. the free parameters.
    fn jacobian(&self, reduced: &DVector<f64>) -> DMatrix<f64> {
        let m = reduced.len();
        let mut jac = DMatrix::zeros(self.data.len(), m);
        for col in 0..m {
            let h = 1e-6 * reduced[col].abs().max(1.0);
            let mut plus = reduced.clone();
            plus[col] += h;
            let mut minus = reduced.clone();
            minus[col] -= h;
            let (p_plus, p_minus) = (self.full(&plus), self.full(&minus));
            for (row, point) in self.data.iter().enumerate() {
                let df = self.model.evaluate(point.angle, &p_plus)
                    - self.model.evaluate(point.angle, &p_minus);
                jac[(row, col)] = df / (2.0 * h);
            }
        }
        jac
    }

    fn project(&self, reduced: &mut DVector<f64>) {
        for (value, bounds) in reduced.iter_mut().zip(&self.bounds) {
            *value = bounds.clamp(*value);
        }
    }
}

struct Solution {
    params: DVector<f64>,
    cost: f64,
    iterations: usize,
}

impl CurveFitter {
    /// Fit `data` to `model`, holding parameters flagged in `fixed_mask` at
    /// their `initial` value.
    ///
    /// # Errors
    ///
    /// - `ParameterMismatch` when `initial`, `bounds` or `fixed_mask` disagree with the model
    /// - `InsufficientData` with fewer than [`MIN_FIT_POINTS`] points
    /// - `NoFreeParameters` when every parameter is fixed
    /// - `InfeasibleStart` when a free initial value violates its bounds
    /// - `Convergence` when the solver fails
    pub fn fit(
        &self,
        model: &dyn FitModel,
        initial: &[f64],
        bounds: &[ParameterBounds],
        fixed_mask: &[bool],
        data: &[MetricPoint],
    ) -> Result<FitResult, FitError> {
        let expected = model.parameter_count();
        for got in [initial.len(), bounds.len(), fixed_mask.len()] {
            if got != expected {
                return Err(FitError::ParameterMismatch { expected, got });
            }
        }
        if data.len() < MIN_FIT_POINTS {
            warn!(points = data.len(), "Not enough data points to perform fit");
            return Err(FitError::InsufficientData {
                got: data.len(),
                required: MIN_FIT_POINTS,
            });
        }

        let partition = ParameterPartition::from_mask(fixed_mask);
        if partition.free().is_empty() {
            warn!("No parameters selected for fitting");
            return Err(FitError::NoFreeParameters);
        }

        let names = model.parameter_names();
        for &i in partition.free() {
            let b = bounds[i];
            if b.lower > b.upper || !b.contains(initial[i]) {
                return Err(FitError::InfeasibleStart {
                    name: names[i].to_string(),
                    value: initial[i],
                });
            }
        }

        let problem = ReducedProblem {
            model,
            data,
            partition: &partition,
            template: initial,
            bounds: partition.reduce(bounds),
        };
        info!(
            model = model.name(),
            points = data.len(),
            free = ?partition.free().iter().map(|&i| names[i]).collect::<Vec<_>>(),
            "Attempting curve fit"
        );

        let start = DVector::from_vec(partition.reduce(initial));
        let solution = self.levenberg_marquardt(&problem, start)?;

        let full_params = problem.full(&solution.params);
        let reduced_cov = self.reduced_covariance(&problem, &solution);
        let covariance = partition.expand_covariance(&reduced_cov);

        let parameters = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let fixed = fixed_mask[i];
                let variance = covariance[(i, i)];
                let std_error = if fixed {
                    0.0
                } else if variance.is_finite() && variance >= 0.0 {
                    variance.sqrt()
                } else {
                    f64::INFINITY
                };
                FittedParameter {
                    name: name.to_string(),
                    value: full_params[i],
                    std_error,
                    fixed,
                }
            })
            .collect::<Vec<_>>();

        let message = if parameters.iter().any(|p| p.std_error.is_infinite()) {
            "Fit successful (parameter errors could not be estimated).".to_string()
        } else {
            "Fit successful.".to_string()
        };
        info!(
            iterations = solution.iterations,
            rss = solution.cost,
            params = ?full_params,
            "Fit converged"
        );

        Ok(FitResult {
            model: model.name().to_string(),
            curve: self.sample_curve(model, &full_params, data),
            covariance: (0..covariance.nrows())
                .map(|r| covariance.row(r).iter().copied().collect())
                .collect(),
            parameters,
            residual_sum_of_squares: solution.cost,
            iterations: solution.iterations,
            success: true,
            message,
        })
    }

    fn levenberg_marquardt(
        &self,
        problem: &ReducedProblem<'_>,
        mut params: DVector<f64>,
    ) -> Result<Solution, FitError> {
        let mut residuals = problem.residuals(&params);
        let mut cost = residuals.norm_squared();
        if !cost.is_finite() {
            return Err(FitError::Convergence(
                "model is not finite at the initial parameters".to_string(),
            ));
        }

        let m = params.len();
        let mut lambda = LAMBDA_INITIAL;

        for iteration in 1..=self.max_iterations {
            if cost == 0.0 {
                return Ok(Solution { params, cost, iterations: iteration - 1 });
            }

            let jac = problem.jacobian(&params);
            let jtj = jac.transpose() * &jac;
            let gradient = jac.transpose() * &residuals;

            loop {
                let mut damped = jtj.clone();
                for i in 0..m {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
                }

                let step = match damped.cholesky() {
                    Some(chol) => chol.solve(&gradient),
                    None => {
                        lambda *= 10.0;
                        if lambda > LAMBDA_MAX {
                            return Err(FitError::Convergence(
                                "normal equations are singular".to_string(),
                            ));
                        }
                        continue;
                    }
                };

                let mut candidate = &params + &step;
                problem.project(&mut candidate);
                let candidate_residuals = problem.residuals(&candidate);
                let candidate_cost = candidate_residuals.norm_squared();

                if candidate_cost.is_finite() && candidate_cost < cost {
                    let moved = (&candidate - &params).norm();
                    let reduction = cost - candidate_cost;
                    let scale = params.norm();

                    params = candidate;
                    residuals = candidate_residuals;
                    let previous = cost;
                    cost = candidate_cost;
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);

                    debug!(iteration, cost, lambda, "LM step accepted");
                    if reduction <= self.ftol * previous || moved <= self.xtol * (scale + self.xtol)
                    {
                        return Ok(Solution { params, cost, iterations: iteration });
                    }
                    break;
                }

                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    // No direction lowers the cost any further.
                    return Ok(Solution { params, cost, iterations: iteration });
                }
            }
        }

        Err(FitError::Convergence(format!(
            "no convergence after {} iterations",
            self.max_iterations
        )))
    }

    /// `s²·(JᵀJ)⁻¹` over the free parameters, `s² = RSS / (n − m)`.
    fn reduced_covariance(&self, problem: &ReducedProblem<'_>, solution: &Solution) -> DMatrix<f64> {
        let m = solution.params.len();
        let dof = problem.data.len().saturating_sub(m);
        let jac = problem.jacobian(&solution.params);
        let jtj = jac.transpose() * &jac;

        match jtj.try_inverse() {
            Some(inverse) if dof > 0 => inverse * (solution.cost / dof as f64),
            _ => {
                warn!(dof, "Covariance of the parameters could not be estimated");
                DMatrix::from_element(m, m, f64::INFINITY)
            }
        }
    }

    fn sample_curve(
        &self,
        model: &dyn FitModel,
        params: &[f64],
        data: &[MetricPoint],
    ) -> Vec<MetricPoint> {
        let (lo, hi) = data.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.angle), hi.max(p.angle))
        });
        let samples = self.curve_samples.max(2);
        (0..samples)
            .map(|i| {
                let angle = lo + (hi - lo) * i as f64 / (samples - 1) as f64;
                MetricPoint::new(angle, model.evaluate(angle, params))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::model::PolarizationModel;

    /// Straight line `y = a + b·x`, handy for exact checks.
    struct Line;

    impl FitModel for Line {
        fn name(&self) -> &str {
            "line"
        }
        fn parameter_names(&self) -> &[&str] {
            &["a", "b"]
        }
        fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
            p[0] + p[1] * x
        }
        fn initial_guess(&self, _data: &[MetricPoint]) -> Vec<f64> {
            vec![0.0, 0.0]
        }
    }

    fn line_data() -> Vec<MetricPoint> {
        // y = 1 + 2x with alternating ±0.1 noise
        (0..10)
            .map(|i| {
                let x = f64::from(i);
                let noise = if i % 2 == 0 { 0.1 } else { -0.1 };
                MetricPoint::new(x, 1.0 + 2.0 * x + noise)
            })
            .collect()
    }

    #[test]
    fn test_partition_from_mask() {
        let partition = ParameterPartition::from_mask(&[false, true, false]);
        assert_eq!(partition.free(), &[0, 2]);
        assert_eq!(partition.fixed(), &[1]);
        assert_eq!(partition.reduce(&[10.0, 20.0, 30.0]), vec![10.0, 30.0]);
        assert_eq!(
            partition.expand(&[1.0, 3.0], &[10.0, 20.0, 30.0]),
            vec![1.0, 20.0, 3.0]
        );
    }

    #[test]
    fn test_expand_covariance_zeroes_fixed() {
        let partition = ParameterPartition::from_mask(&[false, true, false]);
        let reduced = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 4.0]);
        let full = partition.expand_covariance(&reduced);
        assert_eq!(full[(0, 0)], 1.0);
        assert_eq!(full[(0, 2)], 0.5);
        assert_eq!(full[(2, 2)], 4.0);
        assert_eq!(full.row(1).iter().copied().sum::<f64>(), 0.0);
        assert_eq!(full.column(1).iter().copied().sum::<f64>(), 0.0);
    }

    #[test]
    fn test_line_fit_matches_linear_regression() {
        let data = line_data();
        let result = fit(
            &Line,
            &[0.0, 0.0],
            &Line.default_bounds(),
            &[false, false],
            &data,
        )
        .unwrap();

        // Ordinary least squares closed form
        let n = data.len() as f64;
        let sx: f64 = data.iter().map(|p| p.angle).sum();
        let sy: f64 = data.iter().map(|p| p.value).sum();
        let sxx: f64 = data.iter().map(|p| p.angle * p.angle).sum();
        let sxy: f64 = data.iter().map(|p| p.angle * p.value).sum();
        let b = (n * sxy - sx * sy) / (n * sxx - sx * sx);
        let a = (sy - b * sx) / n;

        assert!(result.success);
        assert!((result.values()[0] - a).abs() < 1e-6);
        assert!((result.values()[1] - b).abs() < 1e-6);
        assert!(result.parameters.iter().all(|p| p.std_error > 0.0));
    }

    #[test]
    fn test_fixed_parameter_held_and_zero_error() {
        let data = line_data();
        let result = fit(
            &Line,
            &[1.0, 0.0],
            &Line.default_bounds(),
            &[true, false],
            &data,
        )
        .unwrap();

        let a = result.parameter("a").unwrap();
        assert_eq!(a.value, 1.0);
        assert_eq!(a.std_error, 0.0);
        assert!(a.fixed);
        assert!((result.parameter("b").unwrap().value - 2.0).abs() < 0.05);
        assert_eq!(result.covariance[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_bounds_are_respected() {
        let data = line_data();
        let bounds = [ParameterBounds::unbounded(), ParameterBounds::new(0.0, 1.5)];
        let result = fit(&Line, &[0.0, 1.0], &bounds, &[false, false], &data).unwrap();
        assert!(result.values()[1] <= 1.5);
    }

    #[test]
    fn test_rejects_infeasible_start() {
        let bounds = [ParameterBounds::unbounded(), ParameterBounds::new(0.0, 1.0)];
        let err = fit(&Line, &[0.0, 5.0], &bounds, &[false, false], &line_data()).unwrap_err();
        assert!(matches!(err, FitError::InfeasibleStart { .. }));
    }

    #[test]
    fn test_rejects_parameter_count_mismatch() {
        let model = PolarizationModel::default();
        let err = fit(
            &model,
            &[1.0, 2.0],
            &model.default_bounds(),
            &[false, false, false],
            &line_data(),
        )
        .unwrap_err();
        assert_eq!(err, FitError::ParameterMismatch { expected: 3, got: 2 });
    }

    /// `y = a + b·x + c·x²`
    struct Quadratic;

    impl FitModel for Quadratic {
        fn name(&self) -> &str {
            "quadratic"
        }
        fn parameter_names(&self) -> &[&str] {
            &["a", "b", "c"]
        }
        fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
            p[0] + p[1] * x + p[2] * x * x
        }
        fn initial_guess(&self, _data: &[MetricPoint]) -> Vec<f64> {
            vec![0.0, 0.0, 0.0]
        }
    }

    #[test]
    fn test_zero_degrees_of_freedom_reports_infinite_errors() {
        let data = [
            MetricPoint::new(0.0, 1.0),
            MetricPoint::new(1.0, 2.0),
            MetricPoint::new(2.0, 5.0),
        ];
        let result = fit(
            &Quadratic,
            &[0.0, 0.0, 0.0],
            &Quadratic.default_bounds(),
            &[false, false, false],
            &data,
        )
        .unwrap();
        assert!((result.values()[2] - 1.0).abs() < 1e-6);
        assert!(result.parameters.iter().all(|p| p.std_error.is_infinite()));
        assert!(result.message.contains("could not be estimated"));
    }

    #[test]
    fn test_curve_spans_data_range() {
        let result = fit(
            &Line,
            &[0.0, 0.0],
            &Line.default_bounds(),
            &[false, false],
            &line_data(),
        )
        .unwrap();
        assert_eq!(result.curve.len(), 200);
        assert_eq!(result.curve[0].angle, 0.0);
        assert!((result.curve[199].angle - 9.0).abs() < 1e-12);
    }
}
