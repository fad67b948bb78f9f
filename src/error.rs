//! Custom error types for the application.
//!
//! This module defines the error taxonomy for the scan controller, using the
//! `thiserror` crate for consistent `Display` output and `#[from]` conversions.
//!
//! ## Error Hierarchy
//!
//! - **`ScanError`**: Everything the scan orchestrator can report. `Config`,
//!   `InvalidRange`, `DeviceNotReady` and `AlreadyRunning` are returned
//!   synchronously from `start`. `Move` and `Acquisition` end a run and only
//!   reach the caller through the completion event. `ArtifactMissing` is
//!   per-step and non-fatal; it is surfaced as a status warning.
//! - **`BandError`**: A metric band with bad edges, from scan settings or the
//!   offline loader.
//! - **`FitError`**: Returned by the curve fit engine. Never fatal to a scan.
//! - **`ArtifactError`**: Reading or writing the tab-delimited spectrum files.
//! - **`DaqError`**: Top-level error for the binary, wrapping the above plus
//!   configuration and I/O failures.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the scan orchestrator and the step sequencer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// The scan configuration violates one of its invariants.
    #[error("Invalid scan configuration: {0}")]
    Config(String),

    /// The angle range cannot produce a step plan.
    #[error("Invalid angle range: {0}")]
    InvalidRange(String),

    /// A device adapter reported that it is not ready.
    #[error("{0} is not ready. Cannot start scan.")]
    DeviceNotReady(String),

    /// A scan is already running or paused.
    #[error("Scan is already in progress")]
    AlreadyRunning,

    /// The stage failed or timed out while moving.
    #[error("Move failed at {angle:.2}°: {reason}")]
    Move {
        /// Commanded angle in degrees
        angle: f64,
        /// Underlying cause
        reason: String,
    },

    /// The detector failed or timed out while acquiring.
    #[error("Acquisition failed at {angle:.2}°: {reason}")]
    Acquisition {
        /// Angle at which the acquisition was attempted
        angle: f64,
        /// Underlying cause
        reason: String,
    },

    /// The artifact for a step could not be retrieved before the deadline.
    #[error("Artifact not found: {0}")]
    ArtifactMissing(String),

    /// The configured metric band is unusable.
    #[error("Invalid scan configuration: {0}")]
    Band(#[from] BandError),
}

/// Reasons a metric band is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BandError {
    /// An edge is NaN or infinite.
    #[error("band edges must be finite (got [{min}, {max}])")]
    NonFinite {
        /// Lower edge
        min: f64,
        /// Upper edge
        max: f64,
    },

    /// An edge is below zero.
    #[error("band edges must be non-negative (got [{min}, {max}])")]
    Negative {
        /// Lower edge
        min: f64,
        /// Upper edge
        max: f64,
    },

    /// The band is empty or inverted.
    #[error("band minimum must be below maximum (got [{min}, {max}])")]
    Inverted {
        /// Lower edge
        min: f64,
        /// Upper edge
        max: f64,
    },
}

/// Errors returned by the curve fit engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Fewer points than the fit needs.
    #[error("Not enough data points to perform fit ({got} < {required})")]
    InsufficientData {
        /// Points supplied
        got: usize,
        /// Minimum required
        required: usize,
    },

    /// The fixed mask excludes every parameter.
    #[error("No parameters selected for fitting")]
    NoFreeParameters,

    /// Initial values, bounds and mask disagree on the parameter count.
    #[error("Parameter count mismatch: model has {expected}, got {got}")]
    ParameterMismatch {
        /// Parameters the model declares
        expected: usize,
        /// Length of the offending input
        got: usize,
    },

    /// An initial value lies outside its bounds.
    #[error("Initial value for '{name}' ({value}) is outside its bounds")]
    InfeasibleStart {
        /// Parameter name
        name: String,
        /// Offending initial value
        value: f64,
    },

    /// The solver failed to converge.
    #[error("Fit failed: {0}")]
    Convergence(String),
}

/// Errors raised while reading or writing artifact files.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// File could not be opened, read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed delimited record
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Table shape or contents are not two numeric columns
    #[error("Unexpected data format: {0}")]
    Format(String),

    /// File name carries no angle token
    #[error("Could not extract angle from file name: {0}")]
    NoAngleInName(String),

    /// Band requested for metric extraction is unusable
    #[error(transparent)]
    Band(#[from] BandError),
}

/// Top-level application error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings could not be loaded or are invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem failure outside artifact handling
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scan rejected or failed
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Curve fit failed
    #[error(transparent)]
    Fit(#[from] FitError),

    /// Artifact codec failure
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Tracing subscriber could not be installed
    #[error("Logging initialization failed: {0}")]
    Logging(String),
}
