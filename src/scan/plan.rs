//! Step sequencer: angle range parameters to an ordered list of target angles.

use serde::Serialize;
use tracing::debug;

use crate::error::ScanError;

/// Upper bound on the number of steps a single plan may contain.
pub const MAX_PLAN_STEPS: usize = 100_000;

/// Ordered, immutable list of target angles for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepPlan {
    angles: Vec<f64>,
}

impl StepPlan {
    /// Build the plan for `start..=end` in increments of `step`.
    ///
    /// The end value is included when the grid lands within half a step of
    /// it. `step` may be negative for descending scans.
    ///
    /// # Errors
    ///
    /// `ScanError::InvalidRange` when `step == 0`, `start == end`, any input is
    /// not finite, `step` points away from `end`, or the plan would exceed
    /// [`MAX_PLAN_STEPS`].
    pub fn new(start: f64, end: f64, step: f64) -> Result<Self, ScanError> {
        if !start.is_finite() || !end.is_finite() || !step.is_finite() {
            return Err(ScanError::InvalidRange(format!(
                "start, end and step must be finite (got {start}, {end}, {step})"
            )));
        }
        if step == 0.0 {
            return Err(ScanError::InvalidRange("step must be nonzero".into()));
        }
        if start == end {
            return Err(ScanError::InvalidRange(
                "start and end angles must differ".into(),
            ));
        }
        if (end - start).signum() != step.signum() {
            return Err(ScanError::InvalidRange(format!(
                "step {step} does not move from {start} towards {end}"
            )));
        }

        let half = step.abs() / 2.0;
        let span = (end - start).abs() / step.abs();
        if span + 1.0 > MAX_PLAN_STEPS as f64 {
            return Err(ScanError::InvalidRange(format!(
                "range {start}..{end} with step {step} exceeds {MAX_PLAN_STEPS} steps"
            )));
        }

        // Points while sign(step)·(a − end) ≤ |step|/2
        let count = (span + 0.5).floor() as usize + 1;
        let mut angles: Vec<f64> = (0..count).map(|i| start + i as f64 * step).collect();

        // Rounding can still push the last point past the half-step window;
        // fall back to the exclusive grid in that case.
        if let Some(&last) = angles.last() {
            if step.signum() * (last - end) > half && angles.len() > 1 {
                angles.pop();
            }
        }

        debug!(start, end, step, steps = angles.len(), "Step plan computed");
        Ok(Self { angles })
    }

    /// Target angles in execution order.
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.angles.len()
    }

    /// Returns true if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    /// Iterate the target angles.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.angles.iter().copied()
    }
}

/// Target angles for `start..=end` by `step`. See [`StepPlan::new`].
pub fn plan(start: f64, end: f64, step: f64) -> Result<Vec<f64>, ScanError> {
    StepPlan::new(start, end, step).map(|p| p.angles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_inclusive_end() {
        assert_eq!(plan(0.0, 90.0, 30.0).unwrap(), vec![0.0, 30.0, 60.0, 90.0]);
    }

    #[test]
    fn test_descending() {
        assert_eq!(plan(90.0, 0.0, -30.0).unwrap(), vec![90.0, 60.0, 30.0, 0.0]);
    }

    #[test]
    fn test_non_divisible_range() {
        // 12 overshoots 10 by exactly half a step and is kept
        assert_eq!(plan(0.0, 10.0, 4.0).unwrap(), vec![0.0, 4.0, 8.0, 12.0]);
        assert_eq!(plan(0.0, 9.0, 4.0).unwrap(), vec![0.0, 4.0, 8.0]);
    }

    #[test]
    fn test_step_larger_than_range() {
        assert_eq!(plan(0.0, 1.0, 5.0).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(plan(0.0, 90.0, 0.0), Err(ScanError::InvalidRange(_))));
        assert!(matches!(plan(10.0, 10.0, 1.0), Err(ScanError::InvalidRange(_))));
        assert!(matches!(plan(0.0, 90.0, -5.0), Err(ScanError::InvalidRange(_))));
        assert!(matches!(plan(0.0, f64::NAN, 5.0), Err(ScanError::InvalidRange(_))));
        assert!(matches!(plan(0.0, 1e9, 1e-3), Err(ScanError::InvalidRange(_))));
    }

    proptest! {
        #[test]
        fn prop_ascending_plan(
            start in -360.0f64..360.0,
            span in 0.01f64..720.0,
            step in 0.01f64..90.0,
        ) {
            let end = start + span;
            let angles = plan(start, end, step).unwrap();
            prop_assert_eq!(angles[0], start);
            prop_assert!(angles.windows(2).all(|w| w[1] > w[0]));
            let last = *angles.last().unwrap();
            prop_assert!((last - end).abs() <= step / 2.0 + 1e-9);
        }

        #[test]
        fn prop_descending_plan(
            start in -360.0f64..360.0,
            span in 0.01f64..720.0,
            step in 0.01f64..90.0,
        ) {
            let end = start - span;
            let angles = plan(start, end, -step).unwrap();
            prop_assert_eq!(angles[0], start);
            prop_assert!(angles.windows(2).all(|w| w[1] < w[0]));
            let last = *angles.last().unwrap();
            prop_assert!((last - end).abs() <= step / 2.0 + 1e-9);
        }

        #[test]
        fn prop_zero_step_rejected(start in -360.0f64..360.0, end in -360.0f64..360.0) {
            prop_assert!(matches!(plan(start, end, 0.0), Err(ScanError::InvalidRange(_))));
        }
    }
}
