//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over `application.log_level`.

use tracing_subscriber::EnvFilter;

use crate::config::{ApplicationConfig, LogFormat};
use crate::error::DaqError;

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Fails when the level is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init_from_config(config: &ApplicationConfig) -> Result<(), DaqError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| DaqError::Logging(format!("invalid log level '{}': {e}", config.log_level)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match config.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| DaqError::Logging(e.to_string()))
}
