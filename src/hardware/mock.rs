//! Mock Hardware Implementations
//!
//! Simulated devices for running scans without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockRotator` - Rotation stage with finite speed, optional position jitter
//!   and injectable move faults
//! - `MockSpectrometer` - Writes a synthetic Gaussian spectrum per acquisition
//!   whose peak height follows the polarization model of the rotator angle
//!
//! Faults are keyed by zero-based call count, so a test can make exactly the
//! third move hang or the second artifact go missing.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use crate::analysis::model::{FitModel, PolarizationModel};
use crate::data::artifact::{artifact_path, read_artifact, write_artifact};
use crate::data::Spectrum;
use crate::hardware::capabilities::{Actuator, Detector};

/// Failure injected into a single device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return an error
    Fail,
    /// Never return
    Hang,
}

async fn apply_fault(fault: Option<Fault>, device: &str, call: usize) -> Result<()> {
    match fault {
        Some(Fault::Fail) => anyhow::bail!("{device}: injected failure on call #{call}"),
        Some(Fault::Hang) => {
            info!(device, call, "Injected hang");
            std::future::pending::<()>().await;
            Ok(())
        }
        None => Ok(()),
    }
}

// =============================================================================
// MockRotator - Simulated Rotation Stage
// =============================================================================

/// Mock rotation stage
///
/// Simulates a rotator with:
/// - Configurable speed (degrees per second, `f64::INFINITY` for instant moves)
/// - Optional uniform position jitter around the commanded angle
/// - Readiness flag and per-move fault injection
///
/// # Example
///
/// ```rust,ignore
/// let rotator = MockRotator::new();
/// rotator.move_to(30.0).await?;
/// assert_eq!(rotator.current_position().await?, 30.0);
/// ```
pub struct MockRotator {
    position: Arc<RwLock<f64>>,
    speed_deg_per_sec: f64,
    jitter_deg: f64,
    ready: AtomicBool,
    moves: AtomicUsize,
    faults: std::sync::Mutex<HashMap<usize, Fault>>,
    history: Arc<RwLock<Vec<f64>>>,
}

impl MockRotator {
    /// Create a rotator at 0° moving at 90°/s
    pub fn new() -> Self {
        Self::with_speed(90.0)
    }

    /// Rotator whose moves complete immediately
    pub fn instant() -> Self {
        Self::with_speed(f64::INFINITY)
    }

    /// Create a rotator with custom speed
    ///
    /// # Arguments
    /// * `speed_deg_per_sec` - Rotation speed in degrees per second
    pub fn with_speed(speed_deg_per_sec: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(0.0)),
            speed_deg_per_sec,
            jitter_deg: 0.0,
            ready: AtomicBool::new(true),
            moves: AtomicUsize::new(0),
            faults: std::sync::Mutex::new(HashMap::new()),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Land up to `jitter_deg` away from each commanded angle.
    pub fn with_jitter(mut self, jitter_deg: f64) -> Self {
        self.jitter_deg = jitter_deg.abs();
        self
    }

    /// Set the readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Inject a fault into move number `call` (zero-based).
    pub fn inject_fault(&self, call: usize, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(call, fault);
    }

    /// Number of moves commanded so far.
    pub fn move_count(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    /// Commanded angles in order.
    pub async fn history(&self) -> Vec<f64> {
        self.history.read().await.clone()
    }

    /// Position without going through the async trait.
    pub async fn position_now(&self) -> f64 {
        *self.position.read().await
    }

    fn landing_angle(&self, target: f64) -> f64 {
        if self.jitter_deg > 0.0 {
            target + rand::thread_rng().gen_range(-self.jitter_deg..=self.jitter_deg)
        } else {
            target
        }
    }
}

impl Default for MockRotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for MockRotator {
    async fn move_to(&self, target: f64) -> Result<()> {
        let call = self.moves.fetch_add(1, Ordering::SeqCst);
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&call)
            .copied();
        self.history.write().await.push(target);
        apply_fault(fault, "MockRotator", call).await?;

        let current = *self.position.read().await;
        let distance = (target - current).abs();
        let delay = if self.speed_deg_per_sec.is_finite() && self.speed_deg_per_sec > 0.0 {
            Duration::from_secs_f64(distance / self.speed_deg_per_sec)
        } else {
            Duration::ZERO
        };

        debug!(from = current, to = target, ?delay, "MockRotator: moving");
        sleep(delay).await;

        *self.position.write().await = self.landing_angle(target);
        Ok(())
    }

    async fn current_position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// =============================================================================
// MockSpectrometer - Simulated Spectrometer
// =============================================================================

/// Mock spectrometer writing tab-delimited artifacts
///
/// Each acquisition writes `<save_dir>/<name>.<ext>` containing a Gaussian
/// line (center 610 nm, sigma 5 nm) on a flat baseline of 10 counts. The line
/// height is the polarization model `y0 + A·sin²(2·(3θ + 3θ0))` evaluated at the
/// linked rotator's angle.
pub struct MockSpectrometer {
    save_directory: PathBuf,
    extension: String,
    artifact_name: Arc<RwLock<String>>,
    rotator: Option<Arc<MockRotator>>,
    model: PolarizationModel,
    model_params: [f64; 3],
    exposure: Duration,
    write_delay: Duration,
    ready: AtomicBool,
    acquisitions: AtomicUsize,
    faults: std::sync::Mutex<HashMap<usize, Fault>>,
    missing: std::sync::Mutex<Vec<usize>>,
}

impl MockSpectrometer {
    /// Baseline counts of every synthetic spectrum.
    pub const BASELINE: f64 = 10.0;
    /// Center of the synthetic line in nm.
    pub const LINE_CENTER: f64 = 610.0;

    /// Create a spectrometer writing artifacts into `save_directory`.
    pub fn new(save_directory: impl Into<PathBuf>) -> Self {
        Self {
            save_directory: save_directory.into(),
            extension: "csv".to_string(),
            artifact_name: Arc::new(RwLock::new("artifact".to_string())),
            rotator: None,
            model: PolarizationModel::new(3),
            model_params: [50.0, 500.0, 30.0],
            exposure: Duration::ZERO,
            write_delay: Duration::ZERO,
            ready: AtomicBool::new(true),
            acquisitions: AtomicUsize::new(0),
            faults: std::sync::Mutex::new(HashMap::new()),
            missing: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Use `extension` for artifact files.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    /// Follow `rotator` for the simulated polarization angle.
    pub fn with_rotator(mut self, rotator: Arc<MockRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Polarization model parameters `[y0, A, theta0]` for the line height.
    pub fn with_model_params(mut self, params: [f64; 3]) -> Self {
        self.model_params = params;
        self
    }

    /// Simulated exposure time per acquisition.
    pub fn with_exposure(mut self, exposure: Duration) -> Self {
        self.exposure = exposure;
        self
    }

    /// Write the artifact this long after `acquire` returns.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Set the readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Inject a fault into acquisition number `call` (zero-based).
    pub fn inject_fault(&self, call: usize, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(call, fault);
    }

    /// Skip writing the artifact of acquisition number `call` (zero-based).
    pub fn drop_artifact(&self, call: usize) {
        self.missing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(call);
    }

    /// Number of acquisitions triggered so far.
    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Synthetic spectrum at polarization angle `angle`.
    pub fn synthesize(&self, angle: f64) -> Spectrum {
        let height = self.model.evaluate(angle, &self.model_params);
        (0..=120)
            .map(|i| {
                let wavelength = 580.0 + 0.5 * f64::from(i);
                let z = (wavelength - Self::LINE_CENTER) / 5.0;
                (wavelength, Self::BASELINE + height * (-0.5 * z * z).exp())
            })
            .collect()
    }
}

#[async_trait]
impl Detector for MockSpectrometer {
    async fn set_artifact_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            anyhow::bail!("MockSpectrometer: empty artifact name");
        }
        *self.artifact_name.write().await = name.to_string();
        Ok(())
    }

    async fn acquire(&self) -> Result<()> {
        let call = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&call)
            .copied();
        apply_fault(fault, "MockSpectrometer", call).await?;

        sleep(self.exposure).await;

        let skip = self
            .missing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&call);
        if skip {
            debug!(call, "MockSpectrometer: artifact dropped");
            return Ok(());
        }

        let angle = match &self.rotator {
            Some(rotator) => rotator.position_now().await,
            None => 0.0,
        };
        let name = self.artifact_name.read().await.clone();
        let path = artifact_path(&self.save_directory, &name, &self.extension);
        let spectrum = self.synthesize(angle);

        if self.write_delay.is_zero() {
            write_artifact(&path, &spectrum)?;
        } else {
            let delay = self.write_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                if let Err(e) = write_artifact(&path, &spectrum) {
                    tracing::warn!(path = %path.display(), error = %e, "MockSpectrometer: delayed write failed");
                }
            });
        }
        debug!(call, angle, artifact = %name, "MockSpectrometer: acquisition complete");
        Ok(())
    }

    async fn fetch_artifact(&self, name: &str, _timeout: Duration) -> Result<Option<Spectrum>> {
        let path = artifact_path(&self.save_directory, name, &self.extension);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_artifact(&path)?))
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
