//! Fraction-complete and time-remaining estimates.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Progress of a run after a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Completed fraction in `[0, 1]`
    pub fraction: f64,
    /// One-based index of the step just completed
    pub current_step: usize,
    /// Steps in the plan
    pub total_steps: usize,
    /// Estimated seconds remaining
    pub eta_seconds: Option<f64>,
}

impl ProgressSnapshot {
    /// Snapshot after step `index` (zero-based) of `total_steps`, `elapsed`
    /// since the run started.
    ///
    /// ETA is the running-average step duration times the steps remaining.
    pub fn after_step(index: usize, total_steps: usize, elapsed: Duration) -> Self {
        let done = index + 1;
        let fraction = if total_steps == 0 {
            1.0
        } else {
            (done as f64 / total_steps as f64).clamp(0.0, 1.0)
        };
        let remaining = total_steps.saturating_sub(done);
        let eta_seconds = Some(remaining as f64 * elapsed.as_secs_f64() / done as f64);
        Self {
            fraction,
            current_step: done,
            total_steps,
            eta_seconds,
        }
    }

    /// Final snapshot of a run that exhausted its plan.
    pub fn finished(total_steps: usize) -> Self {
        Self {
            fraction: 1.0,
            current_step: total_steps,
            total_steps,
            eta_seconds: None,
        }
    }
}

/// Tracks wall time for one run.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    total_steps: usize,
}

impl ProgressTracker {
    /// Start timing a run of `total_steps`.
    pub fn start(total_steps: usize) -> Self {
        Self {
            started: Instant::now(),
            total_steps,
        }
    }

    /// Snapshot after step `index` completed.
    pub fn update(&self, index: usize) -> ProgressSnapshot {
        ProgressSnapshot::after_step(index, self.total_steps, self.started.elapsed())
    }
}
