// src/interception/fixtures.rs
//! Declarative mock fixtures
//!
//! Fixture files are YAML documents listing mocks:
//!
//! ```yaml
//! mocks:
//!   - pattern: "https://api\\.example\\.com/users/\\d+"
//!     status: 200
//!     json: { id: 1, name: "Ada" }
//!     body_delay_ms: 250
//!   - pattern: "https://api.example.com/health"
//!     kind: exact
//!     status: 503
//!     body_error: "connection reset"
//! ```
//!
//! Relative `file` bodies resolve against the fixture file's directory.

use crate::interception::mock_provider::{MockProvider, MockProviderBuilder};
use crate::interception::rule::{ExactRule, GlobRule, RegexRule};
use crate::utils::errors::{InterceptError, ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How `pattern` is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    #[default]
    Regex,
    Exact,
    Glob,
}

/// Contents of a fixture file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureFile {
    #[serde(default)]
    pub mocks: Vec<MockDefinition>,
}

/// One declared mock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDefinition {
    /// URL pattern
    pub pattern: String,

    #[serde(default)]
    pub kind: PatternKind,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body
    pub json: Option<serde_json::Value>,

    /// Plain text body
    pub text: Option<String>,

    /// Body read from a file at request time
    pub file: Option<PathBuf>,

    pub header_delay_ms: Option<u64>,

    pub body_delay_ms: Option<u64>,

    /// Fail the header phase with this message
    pub header_error: Option<String>,

    /// Deliver the header, then fail the body phase with this message
    pub body_error: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl MockDefinition {
    /// Build a provider; `base_dir` anchors relative file bodies
    pub fn into_provider(self, base_dir: &Path) -> Result<MockProvider> {
        let body_kinds = [
            self.json.is_some(),
            self.text.is_some(),
            self.file.is_some(),
            self.body_error.is_some(),
        ];
        if body_kinds.iter().filter(|set| **set).count() > 1 {
            return Err(InterceptError::FixtureError(format!(
                "mock '{}' declares more than one of json/text/file/body_error",
                self.pattern
            )));
        }

        let mut builder = self.builder()?.with_status(self.status);

        for (name, value) in self.headers {
            builder = builder.with_header(name, value);
        }

        if let Some(value) = self.json {
            builder = builder.with_json(value);
        } else if let Some(text) = self.text {
            builder = builder.with_text(text);
        } else if let Some(file) = self.file {
            builder = builder.with_file(base_dir.join(file));
        } else if let Some(message) = self.body_error {
            builder = builder.failing_body(ProviderError::Simulated(message));
        }

        if let Some(message) = self.header_error {
            builder = builder.failing_header(ProviderError::Simulated(message));
        }
        if let Some(ms) = self.header_delay_ms {
            builder = builder.with_header_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.body_delay_ms {
            builder = builder.with_body_delay(Duration::from_millis(ms));
        }

        Ok(builder.build())
    }

    fn builder(&self) -> Result<MockProviderBuilder> {
        Ok(match self.kind {
            PatternKind::Regex => MockProvider::builder(RegexRule::new(self.pattern.as_str())?),
            PatternKind::Exact => MockProvider::builder(ExactRule::new(self.pattern.as_str())),
            PatternKind::Glob => MockProvider::builder(GlobRule::new(&self.pattern)?),
        })
    }
}

/// Parse fixture YAML into providers, in declaration order
pub fn parse_fixtures(yaml: &str, base_dir: &Path) -> Result<Vec<MockProvider>> {
    let fixture: FixtureFile = serde_yaml::from_str(yaml)?;
    fixture
        .mocks
        .into_iter()
        .map(|definition| definition.into_provider(base_dir))
        .collect()
}

/// Read and parse a fixture file
pub fn load_fixture_file(path: &Path) -> Result<Vec<MockProvider>> {
    debug!("Loading fixtures from {:?}", path);

    let yaml = std::fs::read_to_string(path).map_err(|e| {
        InterceptError::FixtureError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    parse_fixtures(&yaml, base_dir)
}
