// src/interception/mock_provider.rs
//! Canned mock provider
//!
//! [`MockProvider`] composes a URL [`Rule`] with a header source and an
//! optional body source. Anything that can produce header metadata or body
//! bytes (a constant, a JSON document, a file on disk, a configured error)
//! plugs into either slot.
//!
//! ```ignore
//! let provider = MockProvider::builder(RegexRule::new(r"https://api\.example\.com/users")?)
//!     .with_status(200)
//!     .with_json(json!({ "users": [] }))
//!     .with_body_delay(Duration::from_millis(250))
//!     .build();
//! ```

use crate::interception::provider::{
    InterceptedRequest, ProviderId, ResponseHeader, ResponseProvider, Timing,
};
use crate::interception::rule::{self, RegexRule, Rule};
use crate::utils::errors::{ProviderError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Produces response metadata
#[async_trait]
pub trait HeaderSource: Send + Sync + fmt::Debug {
    async fn produce_header(
        &self,
        request: &InterceptedRequest,
    ) -> std::result::Result<ResponseHeader, ProviderError>;
}

/// Produces response payload bytes
#[async_trait]
pub trait BodySource: Send + Sync + fmt::Debug {
    async fn produce_body(
        &self,
        request: &InterceptedRequest,
    ) -> std::result::Result<Bytes, ProviderError>;
}

#[async_trait]
impl HeaderSource for ResponseHeader {
    async fn produce_header(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<ResponseHeader, ProviderError> {
        Ok(self.clone())
    }
}

#[async_trait]
impl HeaderSource for ProviderError {
    async fn produce_header(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<ResponseHeader, ProviderError> {
        Err(self.clone())
    }
}

#[async_trait]
impl BodySource for Bytes {
    async fn produce_body(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<Bytes, ProviderError> {
        Ok(self.clone())
    }
}

#[async_trait]
impl BodySource for ProviderError {
    async fn produce_body(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<Bytes, ProviderError> {
        Err(self.clone())
    }
}

/// JSON document serialized at body time
#[derive(Debug, Clone)]
pub struct JsonBody(pub serde_json::Value);

#[async_trait]
impl BodySource for JsonBody {
    async fn produce_body(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<Bytes, ProviderError> {
        serde_json::to_vec(&self.0)
            .map(Bytes::from)
            .map_err(|e| ProviderError::Encoding(e.to_string()))
    }
}

/// UTF-8 text body
#[derive(Debug, Clone)]
pub struct TextBody(pub String);

#[async_trait]
impl BodySource for TextBody {
    async fn produce_body(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<Bytes, ProviderError> {
        Ok(Bytes::from(self.0.clone()))
    }
}

/// File read from disk on every request
#[derive(Debug, Clone)]
pub struct FileBody(pub PathBuf);

#[async_trait]
impl BodySource for FileBody {
    async fn produce_body(
        &self,
        _request: &InterceptedRequest,
    ) -> std::result::Result<Bytes, ProviderError> {
        debug!("Reading mock body from {:?}", self.0);

        tokio::fs::read(&self.0)
            .await
            .map(Bytes::from)
            .map_err(|e| ProviderError::BodyRead {
                path: self.0.display().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Rule-driven provider with pluggable header and body sources
#[derive(Clone)]
pub struct MockProvider {
    id: ProviderId,
    rule: Arc<dyn Rule>,
    header: Arc<dyn HeaderSource>,
    body: Option<Arc<dyn BodySource>>,
    timing: Timing,
}

impl MockProvider {
    pub fn builder(rule: impl Rule + 'static) -> MockProviderBuilder {
        MockProviderBuilder::new(Arc::new(rule))
    }

    /// Builder for a whole-URL regular expression
    pub fn for_pattern(pattern: &str) -> Result<MockProviderBuilder> {
        Ok(Self::builder(RegexRule::new(pattern)?))
    }

    pub fn rule(&self) -> &dyn Rule {
        self.rule.as_ref()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("id", &self.id)
            .field("rule", &self.rule)
            .field("header", &self.header)
            .field("body", &self.body)
            .field("timing", &self.timing)
            .finish()
    }
}

#[async_trait]
impl ResponseProvider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn can_handle(&self, request: &InterceptedRequest) -> bool {
        // A missing URL matches as the empty string and fails in the header phase
        rule::matches(self.rule.as_ref(), request.url().unwrap_or_default())
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    async fn header(
        &self,
        request: &InterceptedRequest,
    ) -> std::result::Result<ResponseHeader, ProviderError> {
        self.header.produce_header(request).await
    }

    async fn body(&self, request: &InterceptedRequest) -> std::result::Result<Bytes, ProviderError> {
        match &self.body {
            Some(source) => source.produce_body(request).await,
            None => Ok(Bytes::new()),
        }
    }
}

/// Builder for [`MockProvider`]
pub struct MockProviderBuilder {
    rule: Arc<dyn Rule>,
    header: ResponseHeader,
    header_source: Option<Arc<dyn HeaderSource>>,
    body: Option<Arc<dyn BodySource>>,
    timing: Timing,
}

impl MockProviderBuilder {
    fn new(rule: Arc<dyn Rule>) -> Self {
        Self {
            rule,
            header: ResponseHeader::default(),
            header_source: None,
            body: None,
            timing: Timing::immediate(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.header.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.set_default_content_type("application/json");
        self.body = Some(Arc::new(JsonBody(value)));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_default_content_type("text/plain; charset=utf-8");
        self.body = Some(Arc::new(TextBody(text.into())));
        self
    }

    pub fn with_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        self.body = Some(Arc::new(bytes));
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Some(Arc::new(FileBody(path.into())));
        self
    }

    /// Replace the constant header with a custom source
    pub fn with_header_source(mut self, source: impl HeaderSource + 'static) -> Self {
        self.header_source = Some(Arc::new(source));
        self
    }

    pub fn with_body_source(mut self, source: impl BodySource + 'static) -> Self {
        self.body = Some(Arc::new(source));
        self
    }

    /// Fail the header phase with `error`; no header or body is delivered
    pub fn failing_header(mut self, error: ProviderError) -> Self {
        self.header_source = Some(Arc::new(error));
        self
    }

    /// Deliver the header, then fail the body phase with `error`
    pub fn failing_body(mut self, error: ProviderError) -> Self {
        self.body = Some(Arc::new(error));
        self
    }

    pub fn with_header_delay(mut self, delay: Duration) -> Self {
        self.timing.header_delay = Some(delay);
        self
    }

    pub fn with_body_delay(mut self, delay: Duration) -> Self {
        self.timing.body_delay = Some(delay);
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Freeze the configuration under a fresh identity
    pub fn build(self) -> MockProvider {
        let header = match self.header_source {
            Some(source) => source,
            None => Arc::new(self.header) as Arc<dyn HeaderSource>,
        };

        MockProvider {
            id: ProviderId::generate(),
            rule: self.rule,
            header,
            body: self.body,
            timing: self.timing,
        }
    }

    fn set_default_content_type(&mut self, value: &str) {
        let has_content_type = self
            .header
            .fields
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"));

        if !has_content_type {
            self.header
                .fields
                .insert("Content-Type".to_string(), value.to_string());
        }
    }
}
