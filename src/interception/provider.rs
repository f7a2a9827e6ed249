// src/interception/provider.rs
//! Response provider contract
//!
//! A provider decides synchronously whether it answers a request, then
//! produces the response in two asynchronous phases: the header (status and
//! fields) and the body bytes. Either phase may fail on its own.

use crate::utils::errors::ProviderError;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Response, StatusCode, Uri};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use ulid::Ulid;

/// Process-unique provider identity, used only for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(Ulid);

impl ProviderId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prv_{}", self.0)
    }
}

/// Outgoing request as seen by the interception layer
#[derive(Debug, Clone, Default)]
pub struct InterceptedRequest {
    /// HTTP method
    pub method: String,

    /// Target URL; the only input to matching
    pub url: Option<String>,

    /// Request header fields
    pub headers: HashMap<String, String>,

    /// Request payload
    pub body: Option<Bytes>,
}

impl InterceptedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: Some(url.into()),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Request that carries no URL at all
    pub fn without_url(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Parse the URL, requiring a scheme and a host
    pub fn validated_uri(&self) -> Result<Uri, ProviderError> {
        let raw = self.url().ok_or(ProviderError::MissingUrl)?;
        let uri = raw
            .parse::<Uri>()
            .map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", raw, e)))?;

        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(ProviderError::InvalidUrl(format!(
                "{}: scheme and host are required",
                raw
            )));
        }

        Ok(uri)
    }
}

/// Response metadata produced by the header phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// HTTP status code
    pub status: u16,

    /// Header fields, passed through as given
    pub fields: HashMap<String, String>,
}

impl ResponseHeader {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Build the HTTP response envelope, rejecting invalid status codes and
    /// header fields
    pub fn to_http(&self) -> Result<Response<()>, ProviderError> {
        let status = StatusCode::from_u16(self.status).map_err(|_| {
            ProviderError::InvalidEnvelope(format!("status {} is out of range", self.status))
        })?;

        let mut response = Response::new(());
        *response.status_mut() = status;

        for (name, value) in &self.fields {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ProviderError::InvalidEnvelope(format!("invalid header name {:?}", name))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                ProviderError::InvalidEnvelope(format!("invalid value for header {}", name))
            })?;
            response.headers_mut().insert(header_name, header_value);
        }

        Ok(response)
    }
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self::new(200)
    }
}

/// Artificial latency before each phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    /// Delay before the header is produced
    pub header_delay: Option<Duration>,

    /// Delay before the body is produced, counted after the header
    pub body_delay: Option<Duration>,
}

impl Timing {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn with_header_delay(mut self, delay: Duration) -> Self {
        self.header_delay = Some(delay);
        self
    }

    pub fn with_body_delay(mut self, delay: Duration) -> Self {
        self.body_delay = Some(delay);
        self
    }

    /// Minimum time before completion; the delays run back to back
    pub fn total(&self) -> Duration {
        self.header_delay.unwrap_or_default() + self.body_delay.unwrap_or_default()
    }
}

/// Something that can answer intercepted requests
///
/// Implementations must be immutable once registered: `can_handle` is pure
/// and synchronous, and the same request always gets the same behaviour.
#[async_trait]
pub trait ResponseProvider: Send + Sync + fmt::Debug {
    /// Identity assigned at construction
    fn id(&self) -> ProviderId;

    /// Whether this provider answers `request`
    fn can_handle(&self, request: &InterceptedRequest) -> bool;

    /// Delays applied by the engine before each phase
    fn timing(&self) -> Timing {
        Timing::immediate()
    }

    /// Produce status and header fields
    async fn header(&self, request: &InterceptedRequest) -> Result<ResponseHeader, ProviderError>;

    /// Produce the payload; providers without one return an empty buffer
    async fn body(&self, request: &InterceptedRequest) -> Result<Bytes, ProviderError>;
}
