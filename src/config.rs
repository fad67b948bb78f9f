//! Configuration System using Figment
//!
//! Strongly-typed settings for the scan controller. Configuration is layered:
//! 1. Built-in defaults
//! 2. A TOML file (optional)
//! 3. Environment variables (prefixed with `POLSCAN_`, `__` separates sections)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! POLSCAN_APPLICATION__LOG_LEVEL=debug
//! POLSCAN_SCAN__STEP_ANGLE=2.5
//! POLSCAN_TIMEOUTS__MOVE_TIMEOUT="90s"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use polscan::config::Settings;
//!
//! let settings = Settings::load(Some("polscan.toml".as_ref()))?;
//! println!("Scanning {}°..{}°", settings.scan.start_angle, settings.scan.end_angle);
//! # Ok::<(), polscan::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::analysis::metric::Band;
use crate::error::ScanError;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment failed to read or extract the settings
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Settings loaded but violate an invariant
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ScanError> for ConfigError {
    fn from(err: ScanError) -> Self {
        ConfigError::ValidationError(err.to_string())
    }
}

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Default scan parameters
    #[serde(default)]
    pub scan: ScanConfig,
    /// Device call deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Curve fit settings
    #[serde(default)]
    pub fit: FitSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Polarization Scan Controller".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, ANSI colored
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Parameters of a single angle scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// First target angle in degrees
    pub start_angle: f64,
    /// Last target angle in degrees (inclusive within half a step)
    pub end_angle: f64,
    /// Signed increment between steps in degrees
    pub step_angle: f64,
    /// Artifact base name
    pub base_filename: String,
    /// Directory the detector writes artifacts into
    pub save_directory: PathBuf,
    /// Append the measured angle to each artifact name
    #[serde(default = "default_true")]
    pub add_position_to_filename: bool,
    /// Forward every retrieved spectrum to the live display
    #[serde(default = "default_true")]
    pub plot_live: bool,
    /// Extract the band maximum at every step
    #[serde(default)]
    pub dynamic_metric_enabled: bool,
    /// Independent-variable band for the dynamic metric
    #[serde(default)]
    pub metric_band: Option<Band>,
    /// Artifact file extension, without the dot
    #[serde(default = "default_extension")]
    pub artifact_extension: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_angle: 0.0,
            end_angle: 180.0,
            step_angle: 5.0,
            base_filename: "scan".to_string(),
            save_directory: PathBuf::from("."),
            add_position_to_filename: true,
            plot_live: true,
            dynamic_metric_enabled: false,
            metric_band: None,
            artifact_extension: default_extension(),
        }
    }
}

impl ScanConfig {
    /// Check the scan invariants.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::Config` describing the first violated invariant.
    pub fn validate(&self) -> Result<(), ScanError> {
        let angles = [self.start_angle, self.end_angle, self.step_angle];
        if angles.iter().any(|a| !a.is_finite()) {
            return Err(ScanError::Config("angles must be finite numbers".into()));
        }
        if self.start_angle == self.end_angle {
            return Err(ScanError::Config(
                "start and end angles must differ".into(),
            ));
        }
        if self.step_angle == 0.0 {
            return Err(ScanError::Config("step angle must be nonzero".into()));
        }
        if self.base_filename.trim().is_empty() {
            return Err(ScanError::Config("base filename cannot be empty".into()));
        }
        if self.dynamic_metric_enabled {
            match &self.metric_band {
                None => {
                    return Err(ScanError::Config(
                        "dynamic metric requires a metric band".into(),
                    ))
                }
                Some(band) => band.validate()?,
            }
        }
        Ok(())
    }
}

/// Deadlines and delays for device calls made by the scan worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for a single stage move
    #[serde(with = "humantime_serde", default = "default_move_timeout")]
    pub move_timeout: Duration,
    /// Upper bound for a single acquisition
    #[serde(with = "humantime_serde", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
    /// Total time to wait for an artifact to appear
    #[serde(with = "humantime_serde", default = "default_artifact_wait")]
    pub artifact_wait: Duration,
    /// Delay between artifact fetch attempts
    #[serde(with = "humantime_serde", default = "default_artifact_poll")]
    pub artifact_poll_interval: Duration,
    /// Wait after a move before reading the position
    #[serde(with = "humantime_serde", default = "default_settle_delay")]
    pub settle_delay: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            move_timeout: default_move_timeout(),
            acquire_timeout: default_acquire_timeout(),
            artifact_wait: default_artifact_wait(),
            artifact_poll_interval: default_artifact_poll(),
            settle_delay: default_settle_delay(),
        }
    }
}

/// Initial value, fixed flag and bounds for one model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSetting {
    /// Initial guess; estimated from the data when absent
    #[serde(default)]
    pub initial: Option<f64>,
    /// Hold at `initial` instead of optimizing
    #[serde(default)]
    pub fixed: bool,
    /// Lower bound override
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound override
    #[serde(default)]
    pub max: Option<f64>,
}

/// Settings for fitting the polarization model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// Integer angle multiplier of the model
    #[serde(default = "default_k")]
    pub k: u32,
    /// Solver iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Baseline offset
    #[serde(default)]
    pub y0: ParameterSetting,
    /// Modulation amplitude
    #[serde(default)]
    pub amplitude: ParameterSetting,
    /// Phase offset in degrees
    #[serde(default)]
    pub theta0: ParameterSetting,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_iterations: default_max_iterations(),
            y0: ParameterSetting::default(),
            amplitude: ParameterSetting::default(),
            theta0: ParameterSetting::default(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_extension() -> String {
    "csv".to_string()
}

fn default_move_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_artifact_wait() -> Duration {
    Duration::from_secs(3)
}

fn default_artifact_poll() -> Duration {
    Duration::from_millis(200)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_k() -> u32 {
    3
}

fn default_max_iterations() -> usize {
    5000
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (`POLSCAN_` prefix)
    /// 2. The TOML file, when given
    /// 3. Built-in defaults
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed("POLSCAN_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.scan.validate()?;

        let timeouts = [
            ("move_timeout", self.timeouts.move_timeout),
            ("acquire_timeout", self.timeouts.acquire_timeout),
            ("artifact_wait", self.timeouts.artifact_wait),
            ("artifact_poll_interval", self.timeouts.artifact_poll_interval),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }

        if self.fit.k == 0 {
            return Err(ConfigError::ValidationError(
                "fit.k must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}
