//! Parametric models for the angular response.

use serde::{Deserialize, Serialize};

use super::dataset::MetricPoint;
use crate::config::{FitSettings, ParameterSetting};

/// Closed interval a parameter is constrained to. Either side may be infinite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    /// Lower limit
    pub lower: f64,
    /// Upper limit
    pub upper: f64,
}

impl ParameterBounds {
    /// Bounds `[lower, upper]`.
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// No constraint.
    pub const fn unbounded() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Whether `value` satisfies the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Project `value` onto the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }
}

/// A model `y = f(x; p)` the curve fit engine can optimize.
pub trait FitModel: Send + Sync {
    /// Short model identifier used in reports.
    fn name(&self) -> &str;

    /// Parameter names, in the order `evaluate` expects them.
    fn parameter_names(&self) -> &[&str];

    /// Evaluate the model at `x` (degrees).
    fn evaluate(&self, x: f64, params: &[f64]) -> f64;

    /// Bounds applied when the caller supplies none.
    fn default_bounds(&self) -> Vec<ParameterBounds> {
        vec![ParameterBounds::unbounded(); self.parameter_names().len()]
    }

    /// Starting point estimated from the data.
    fn initial_guess(&self, data: &[MetricPoint]) -> Vec<f64>;

    /// Number of parameters.
    fn parameter_count(&self) -> usize {
        self.parameter_names().len()
    }
}

/// `intensity(θ) = y0 + A·sin²(2·(k·θ + k·θ0))`, angles in degrees.
///
/// `k` is an integer multiplier fixed by the optical setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarizationModel {
    k: u32,
}

impl PolarizationModel {
    /// Index of `y0` in the parameter vector.
    pub const Y0: usize = 0;
    /// Index of `A`.
    pub const AMPLITUDE: usize = 1;
    /// Index of `θ0`.
    pub const THETA0: usize = 2;

    const NAMES: [&'static str; 3] = ["y0", "A", "theta0"];

    /// Model with angle multiplier `k`.
    pub fn new(k: u32) -> Self {
        Self { k }
    }

    /// The angle multiplier.
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Period of the response in θ0 (and θ), in degrees.
    pub fn period(&self) -> f64 {
        90.0 / f64::from(self.k)
    }

    /// Initial values, bounds and fixed mask from configuration.
    ///
    /// Parameters without a configured initial value fall back to
    /// [`FitModel::initial_guess`]; bound overrides replace the model defaults.
    pub fn inputs_from_settings(
        &self,
        settings: &FitSettings,
        data: &[MetricPoint],
    ) -> (Vec<f64>, Vec<ParameterBounds>, Vec<bool>) {
        let guess = self.initial_guess(data);
        let defaults = self.default_bounds();
        let configured: [&ParameterSetting; 3] =
            [&settings.y0, &settings.amplitude, &settings.theta0];

        let mut initial = Vec::with_capacity(3);
        let mut bounds = Vec::with_capacity(3);
        let mut fixed = Vec::with_capacity(3);
        for (i, setting) in configured.iter().enumerate() {
            initial.push(setting.initial.unwrap_or(guess[i]));
            bounds.push(ParameterBounds::new(
                setting.min.unwrap_or(defaults[i].lower),
                setting.max.unwrap_or(defaults[i].upper),
            ));
            fixed.push(setting.fixed);
        }
        (initial, bounds, fixed)
    }
}

impl Default for PolarizationModel {
    fn default() -> Self {
        Self::new(3)
    }
}

impl FitModel for PolarizationModel {
    fn name(&self) -> &str {
        "sin2"
    }

    fn parameter_names(&self) -> &[&str] {
        &Self::NAMES
    }

    fn evaluate(&self, theta_deg: f64, params: &[f64]) -> f64 {
        let k = f64::from(self.k);
        let (y0, amplitude, theta0) = (params[Self::Y0], params[Self::AMPLITUDE], params[Self::THETA0]);
        let phase = (2.0 * (k * theta_deg + k * theta0)).to_radians();
        y0 + amplitude * phase.sin().powi(2)
    }

    fn default_bounds(&self) -> Vec<ParameterBounds> {
        vec![
            ParameterBounds::unbounded(),
            ParameterBounds::new(0.0, f64::INFINITY),
            ParameterBounds::new(-360.0, 360.0),
        ]
    }

    fn initial_guess(&self, data: &[MetricPoint]) -> Vec<f64> {
        let Some(first) = data.first() else {
            return vec![0.0, 1.0, 0.0];
        };
        let (mut lo, mut hi) = (first, first);
        for point in data {
            if point.value < lo.value {
                lo = point;
            }
            if point.value > hi.value {
                hi = point;
            }
        }
        // sin² peaks where 2k(θ + θ0) = 90°
        let theta0 = (45.0 / f64::from(self.k) - hi.angle).rem_euclid(self.period());
        vec![lo.value, hi.value - lo.value, theta0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polarization_model_values() {
        let model = PolarizationModel::new(3);
        let params = [50.0, 500.0, 30.0];
        // 2·(3·0 + 90) = 180° -> sin² = 0
        assert!((model.evaluate(0.0, &params) - 50.0).abs() < 1e-9);
        // 2·(3·15 + 90) = 270° -> sin² = 1
        assert!((model.evaluate(15.0, &params) - 550.0).abs() < 1e-9);
    }

    #[test]
    fn test_initial_guess_locates_peak() {
        let model = PolarizationModel::new(3);
        let truth = [50.0, 500.0, 10.0];
        let data: Vec<_> = (0..90)
            .map(|i| {
                let angle = f64::from(i);
                MetricPoint::new(angle, model.evaluate(angle, &truth))
            })
            .collect();
        let guess = model.initial_guess(&data);
        assert!((guess[0] - 50.0).abs() < 1.0);
        assert!((guess[1] - 500.0).abs() < 1.0);
        let shifted = model.evaluate(0.0, &[50.0, 500.0, guess[2]]);
        assert!((shifted - model.evaluate(0.0, &truth)).abs() < 5.0);
    }

    #[test]
    fn test_inputs_from_settings_overrides() {
        let model = PolarizationModel::default();
        let mut settings = FitSettings::default();
        settings.theta0 = ParameterSetting {
            initial: Some(30.0),
            fixed: true,
            min: None,
            max: None,
        };
        settings.amplitude.max = Some(1000.0);

        let data = [
            MetricPoint::new(0.0, 10.0),
            MetricPoint::new(10.0, 20.0),
            MetricPoint::new(20.0, 15.0),
        ];
        let (initial, bounds, fixed) = model.inputs_from_settings(&settings, &data);
        assert_eq!(initial[0], 10.0);
        assert_eq!(initial[1], 10.0);
        assert_eq!(initial[2], 30.0);
        assert_eq!(bounds[1], ParameterBounds::new(0.0, 1000.0));
        assert_eq!(fixed, vec![false, false, true]);
    }
}
