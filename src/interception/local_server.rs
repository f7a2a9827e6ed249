// src/interception/local_server.rs
//! Registry of active response providers
//!
//! The local server keeps providers in insertion order and resolves a request
//! by scanning from the most recently added one, so later registrations
//! override earlier, more general ones without removing them.

use crate::interception::fixtures;
use crate::interception::provider::{InterceptedRequest, ProviderId, ResponseProvider};
use crate::utils::errors::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

static SHARED: Lazy<Arc<LocalServer>> = Lazy::new(|| Arc::new(LocalServer::new()));

/// Ordered provider registry
pub struct LocalServer {
    /// Active providers, oldest first
    providers: RwLock<Vec<Arc<dyn ResponseProvider>>>,
}

impl LocalServer {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
        }
    }

    /// Process-wide registry used by the shared interceptor
    pub fn shared() -> Arc<LocalServer> {
        Arc::clone(&SHARED)
    }

    /// Register a provider; it takes precedence over everything added before
    pub fn add<P>(&self, provider: P) -> ProviderId
    where
        P: ResponseProvider + 'static,
    {
        self.add_shared(Arc::new(provider))
    }

    /// Register an already shared provider
    ///
    /// Adding a provider whose id is already registered is a no-op and
    /// leaves its original position unchanged.
    pub fn add_shared(&self, provider: Arc<dyn ResponseProvider>) -> ProviderId {
        let id = provider.id();
        let count = {
            let mut providers = self.providers.write();
            if providers.iter().any(|registered| registered.id() == id) {
                debug!("Provider {} already registered", id);
                return id;
            }
            providers.push(provider);
            providers.len()
        };

        info!("Added provider {} ({} active)", id, count);
        metrics::gauge!("mock_providers_registered").set(count as f64);
        id
    }

    /// Remove every entry carrying `id`; returns how many were removed
    pub fn remove(&self, id: ProviderId) -> usize {
        let (removed, count) = {
            let mut providers = self.providers.write();
            let before = providers.len();
            providers.retain(|provider| provider.id() != id);
            (before - providers.len(), providers.len())
        };

        if removed > 0 {
            info!("Removed provider {} ({} active)", id, count);
        } else {
            debug!("Provider {} was not registered", id);
        }
        metrics::gauge!("mock_providers_registered").set(count as f64);
        removed
    }

    /// Drop all providers
    pub fn remove_all(&self) {
        self.providers.write().clear();
        metrics::gauge!("mock_providers_registered").set(0.0);
        info!("Cleared all providers");
    }

    /// Pick the provider that answers `request`, newest first
    ///
    /// Scanning stops at the first match. A provider whose `can_handle`
    /// panics is skipped.
    pub fn resolve(&self, request: &InterceptedRequest) -> Option<Arc<dyn ResponseProvider>> {
        let url = request.url().unwrap_or("<none>");
        let providers = self.providers.read();

        for provider in providers.iter().rev() {
            let handles = panic::catch_unwind(AssertUnwindSafe(|| provider.can_handle(request)));
            match handles {
                Ok(true) => {
                    debug!("Resolved {} to provider {}", url, provider.id());
                    return Some(Arc::clone(provider));
                }
                Ok(false) => {}
                Err(_) => warn!("Provider {} panicked while matching {}", provider.id(), url),
            }
        }

        debug!("No provider for {}", url);
        None
    }

    /// Register every mock declared in a YAML fixture file, in file order
    pub fn load_fixtures(&self, path: &Path) -> Result<Vec<ProviderId>> {
        let providers = fixtures::load_fixture_file(path)?;
        let ids = providers
            .into_iter()
            .map(|provider| self.add(provider))
            .collect::<Vec<_>>();

        info!("Loaded {} mocks from {:?}", ids.len(), path);
        Ok(ids)
    }

    /// Identifiers in insertion order
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.read().iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}
