// src/utils/config.rs
//! Interceptor settings
//!
//! Settings come from an optional file (`mock-interceptor.{yaml,toml,json}` in
//! the working directory, or an explicit path) overlaid with environment
//! variables such as `MOCK_INTERCEPTOR__LOGGING__LEVEL=debug`.

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MOCK_INTERCEPTOR";

/// Default settings file stem looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "mock-interceptor";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorSettings {
    /// Logging output
    pub logging: LoggingSettings,

    /// Interception behaviour
    pub interception: InterceptionSettings,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Interception settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptionSettings {
    /// Whether the interceptor claims requests right after construction
    pub start_active: bool,

    /// Fixture files registered at startup, in order
    pub fixtures: Vec<PathBuf>,
}

impl Default for InterceptionSettings {
    fn default() -> Self {
        Self {
            start_active: false,
            fixtures: vec![],
        }
    }
}

impl InterceptorSettings {
    /// Load settings from the default file (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::build(File::with_name(DEFAULT_SETTINGS_FILE).required(false))
    }

    /// Load settings from an explicit file and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        debug!("Loaded interceptor settings: {:?}", settings);
        Ok(settings)
    }
}
