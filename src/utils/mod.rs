// src/utils/mod.rs
//! Common utilities shared by the interception layer
//!
//! - **errors**: Error types and the crate `Result` alias
//! - **config**: Settings loading (file + environment)

pub mod config;
pub mod errors;

pub use config::{InterceptionSettings, InterceptorSettings, LoggingSettings};
pub use errors::{InterceptError, LoadError, MatchEvaluationError, Phase, ProviderError, Result};
