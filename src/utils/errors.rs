// src/utils/errors.rs
//! Error types for the interception layer
//!
//! Three families live here:
//!
//! - [`InterceptError`]: failures of the crate's own setup surface (invalid
//!   rule patterns, settings, fixture files). Returned through [`Result`].
//! - [`ProviderError`]: the value a provider raises from its header or body
//!   producer. Cloneable and comparable so a configured failure reaches the
//!   consumer unchanged.
//! - [`LoadError`]: what the consumer sees in `on_failed`, tagged with the
//!   phase that raised it.

use thiserror::Error;

/// Crate result alias
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Setup-time errors
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fixture error: {0}")]
    FixtureError(String),

    #[error("Observability error: {0}")]
    ObservabilityError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<config::ConfigError> for InterceptError {
    fn from(err: config::ConfigError) -> Self {
        InterceptError::ConfigError(err.to_string())
    }
}

/// A rule could not be evaluated against a candidate string
///
/// Callers treat this as "no match"; it never reaches a request consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule evaluation failed: {0}")]
pub struct MatchEvaluationError(pub String);

/// Error raised by a response producer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Failure configured on purpose by a test fixture
    #[error("simulated failure: {0}")]
    Simulated(String),

    #[error("request has no URL")]
    MissingUrl,

    #[error("request URL is invalid: {0}")]
    InvalidUrl(String),

    /// Status or header fields cannot form an HTTP response
    #[error("invalid response envelope: {0}")]
    InvalidEnvelope(String),

    #[error("failed to read body from {path}: {reason}")]
    BodyRead { path: String, reason: String },

    #[error("failed to encode body: {0}")]
    Encoding(String),

    #[error("provider panicked: {0}")]
    Panicked(String),
}

impl ProviderError {
    /// Shorthand for a fixture failure
    pub fn simulated(message: impl Into<String>) -> Self {
        ProviderError::Simulated(message.into())
    }
}

/// Response phase a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Header,
    Body,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Header => "header",
            Phase::Body => "body",
        }
    }
}

/// Failure surfaced to the consumer of an intercepted request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No header was delivered and no body phase ran
    #[error("header phase failed: {0}")]
    HeaderPhase(ProviderError),

    /// The header was already delivered and stands
    #[error("body phase failed: {0}")]
    BodyPhase(ProviderError),
}

impl LoadError {
    pub fn new(phase: Phase, error: ProviderError) -> Self {
        match phase {
            Phase::Header => LoadError::HeaderPhase(error),
            Phase::Body => LoadError::BodyPhase(error),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            LoadError::HeaderPhase(_) => Phase::Header,
            LoadError::BodyPhase(_) => Phase::Body,
        }
    }

    /// The error exactly as the provider raised it
    pub fn provider_error(&self) -> &ProviderError {
        match self {
            LoadError::HeaderPhase(err) | LoadError::BodyPhase(err) => err,
        }
    }
}
