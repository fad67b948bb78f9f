//! Append-only store of per-step results.
//!
//! The scan worker appends while callers read concurrently. Readers always get
//! a snapshot (`Vec` of shared, immutable entries), so no caller ever observes
//! a half-written step or holds the lock across an `.await`.
//!
//! # Thread Safety
//!
//! - **Writes**: serialized by an internal `RwLock` write guard.
//! - **Reads**: take a read guard only long enough to clone the `Arc`s.
//! - **Poisoning**: a panic while holding the lock does not lose data; the
//!   guard is recovered and the store stays usable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::analysis::dataset::MetricPoint;
use crate::data::Spectrum;

/// Outcome of one scan step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    /// Zero-based position in the step plan
    pub index: usize,
    /// Commanded angle in degrees
    pub target_angle: f64,
    /// Angle reported by the stage after the move
    pub actual_angle: f64,
    /// Artifact name used for the acquisition
    pub artifact_name: String,
    /// Retrieved spectrum; `None` when the artifact could not be fetched
    pub spectrum: Option<Spectrum>,
    /// Band maximum, when the dynamic metric produced one
    pub derived_metric: Option<f64>,
    /// Time the step finished
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    /// Whether the artifact for this step was retrieved.
    pub fn has_data(&self) -> bool {
        self.spectrum.is_some()
    }
}

#[derive(Debug, Default)]
struct Inner {
    steps: Vec<Arc<StepResult>>,
    metric: Vec<MetricPoint>,
}

/// Shared, append-only collection of [`StepResult`]s plus the accumulating
/// `(actual angle, metric)` dataset for the curve fit.
#[derive(Debug, Default, Clone)]
pub struct ResultAggregator {
    inner: Arc<RwLock<Inner>>,
}

impl ResultAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a step. Its metric, if any, is also added to the dataset.
    pub fn append(&self, step: StepResult) {
        let mut inner = self.write();
        if let Some(value) = step.derived_metric {
            inner.metric.push(MetricPoint::new(step.actual_angle, value));
        }
        inner.steps.push(Arc::new(step));
    }

    /// Drop all results before a new run.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.steps.clear();
        inner.metric.clear();
    }

    /// Number of steps recorded.
    pub fn len(&self) -> usize {
        self.read().steps.len()
    }

    /// Returns true if no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all steps in append order.
    pub fn snapshot(&self) -> Vec<Arc<StepResult>> {
        self.read().steps.clone()
    }

    /// Most recent step, if any.
    pub fn latest(&self) -> Option<Arc<StepResult>> {
        self.read().steps.last().cloned()
    }

    /// Snapshot of the `(angle, metric)` dataset.
    pub fn metric_points(&self) -> Vec<MetricPoint> {
        self.read().metric.clone()
    }

    /// Actual angles of all recorded steps, in order.
    pub fn angles(&self) -> Vec<f64> {
        self.read().steps.iter().map(|s| s.actual_angle).collect()
    }
}
