//! Device capability traits consumed by the scan orchestrator.
//!
//! Each trait is one seam the orchestrator drives. Adapters for real hardware
//! (stage controllers, spectrometer SDKs) implement these; the orchestrator
//! never looks up methods at runtime.
//!
//! All calls may block for hardware timescales. Deadlines are imposed by the
//! caller with `tokio::time::timeout`, so implementations need not time out
//! themselves.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::data::Spectrum;

/// Rotation stage.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Name used in status messages.
    fn name(&self) -> &str {
        "Rotator"
    }

    /// Move to an absolute angle in degrees; returns once the move finished.
    async fn move_to(&self, angle: f64) -> Result<()>;

    /// Angle as measured by the stage.
    async fn current_position(&self) -> Result<f64>;

    /// Whether the stage is connected and able to move.
    async fn is_ready(&self) -> bool;
}

/// Acquisition device producing one artifact per trigger.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Name used in status messages.
    fn name(&self) -> &str {
        "Spectrometer"
    }

    /// Set the name of the next artifact.
    async fn set_artifact_name(&self, name: &str) -> Result<()>;

    /// Run one acquisition; returns once it finished.
    async fn acquire(&self) -> Result<()>;

    /// Look up the artifact `name`, waiting at most `timeout` for it.
    ///
    /// `Ok(None)` means the artifact does not exist (yet).
    async fn fetch_artifact(&self, name: &str, timeout: Duration) -> Result<Option<Spectrum>>;

    /// Whether the detector is connected and able to acquire.
    async fn is_ready(&self) -> bool;
}
