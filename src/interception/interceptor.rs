// src/interception/interceptor.rs
//! Request interceptor and activation switch
//!
//! The interceptor is the entry point the host networking layer calls for
//! every outgoing request. While active it resolves a provider from its
//! [`LocalServer`] and spawns a [`LoadTask`] to answer the request; while
//! stopped, or when nothing matches, it declines and the request must go to
//! the real network.

use crate::interception::engine::{
    ChannelSink, LoadEvent, LoadState, LoadTask, RequestHandle, ResponseSink,
};
use crate::interception::local_server::LocalServer;
use crate::interception::provider::{InterceptedRequest, ResponseHeader, ResponseProvider};
use crate::utils::config::InterceptorSettings;
use crate::utils::errors::{LoadError, Result};
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

static SHARED: Lazy<Interceptor> =
    Lazy::new(|| Interceptor::new(InterceptorConfig::default(), LocalServer::shared()));

/// Configuration for the interceptor
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Claim requests immediately after construction
    pub start_active: bool,

    /// Log every request the interceptor is asked about
    pub log_requests: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            start_active: false,
            log_requests: true,
        }
    }
}

/// Switchable request interceptor
pub struct Interceptor {
    config: InterceptorConfig,
    server: Arc<LocalServer>,
    active: AtomicBool,
}

impl Interceptor {
    /// Create an interceptor answering from `server`
    pub fn new(config: InterceptorConfig, server: Arc<LocalServer>) -> Self {
        let active = AtomicBool::new(config.start_active);
        Self {
            config,
            server,
            active,
        }
    }

    /// Process-wide interceptor backed by [`LocalServer::shared`]
    pub fn shared() -> &'static Interceptor {
        &SHARED
    }

    /// Build an interceptor with its own registry, pre-loaded with the
    /// fixtures named in `settings`
    pub fn from_settings(settings: &InterceptorSettings) -> Result<Self> {
        let server = Arc::new(LocalServer::new());
        for path in &settings.interception.fixtures {
            server.load_fixtures(path)?;
        }

        let config = InterceptorConfig {
            start_active: settings.interception.start_active,
            ..Default::default()
        };
        Ok(Self::new(config, server))
    }

    pub fn server(&self) -> &Arc<LocalServer> {
        &self.server
    }

    /// Begin claiming requests
    pub fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            info!("Interception started");
        }
    }

    /// Stop claiming requests; in-flight requests are unaffected
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Interception stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Provider that would answer `request`, if interception is active
    pub fn claim(&self, request: &InterceptedRequest) -> Option<Arc<dyn ResponseProvider>> {
        if self.config.log_requests {
            debug!(
                "Intercepted request: {} {}",
                request.method,
                request.url().unwrap_or("<none>")
            );
        }

        if !self.is_active() {
            debug!("Interception inactive, passing request through");
            return None;
        }

        self.server.resolve(request)
    }

    /// Answer `request` asynchronously, delivering events to `sink`
    ///
    /// Returns `None` when the request is not claimed. Must be called from
    /// within a tokio runtime.
    pub fn dispatch(
        &self,
        request: InterceptedRequest,
        sink: Arc<dyn ResponseSink>,
    ) -> Option<RequestHandle> {
        let provider = self.claim(&request)?;
        let task = LoadTask::new(request, provider, sink, CancellationToken::new());
        Some(RequestHandle::spawn(task))
    }

    /// Answer `request` and collect the whole response
    ///
    /// Returns `None` when the request is not claimed.
    pub async fn fetch(
        &self,
        request: InterceptedRequest,
    ) -> Option<std::result::Result<MockResponse, LoadError>> {
        let (sink, mut rx) = ChannelSink::channel();
        let handle = self.dispatch(request, Arc::new(sink))?;

        let mut header = None;
        let mut body = Bytes::new();
        while let Some(event) = rx.recv().await {
            match event {
                LoadEvent::Header(received) => header = Some(received),
                LoadEvent::Body(chunk) => body = chunk,
                LoadEvent::Completed => break,
                LoadEvent::Failed(err) => return Some(Err(err)),
            }
        }

        let state = handle.finished().await;
        debug!("Fetch finished in state {:?}", state);

        match (state, header) {
            (LoadState::Completed, Some(header)) => Some(Ok(MockResponse { header, body })),
            _ => None,
        }
    }
}

/// Begin intercepting on the process-wide interceptor
pub fn start() {
    Interceptor::shared().start();
}

/// Stop intercepting on the process-wide interceptor
pub fn stop() {
    Interceptor::shared().stop();
}

/// A fully received mock response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub header: ResponseHeader,
    pub body: Bytes,
}

impl MockResponse {
    pub fn status(&self) -> u16 {
        self.header.status
    }

    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}
