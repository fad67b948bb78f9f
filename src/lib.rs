//! Polarization scan controller.
//!
//! Rotates a stage through a series of angles, triggers a detector acquisition
//! at each angle, extracts an optional banded metric per step and fits the
//! accumulated angular response to a parametric model.
//!
//! - [`scan`]: the orchestrator state machine, step plans, progress and hooks
//! - [`hardware`]: the `Actuator` / `Detector` seams and mock devices
//! - [`data`]: spectra, the artifact file codec and the result aggregator
//! - [`analysis`]: banded metrics, dataset loading and the curve fit engine
//! - [`config`]: layered settings (defaults, TOML, `POLSCAN_*` environment)

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod logging;
pub mod scan;

pub use error::{AppResult, DaqError};
