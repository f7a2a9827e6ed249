// src/observability.rs
//! Logging setup
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` wins over the level in
//! the settings when both are present.

use crate::utils::config::LoggingSettings;
use crate::utils::errors::{InterceptError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; fails if one is already installed
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| InterceptError::ObservabilityError(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| InterceptError::ObservabilityError(e.to_string()))
}
