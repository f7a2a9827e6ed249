// src/interception/mod.rs
//! Request interception layer
//!
//! This module answers outgoing HTTP requests in-process from registered
//! mock providers:
//!
//! - **Rule**: URL predicates (regex, exact, glob, closures)
//! - **Provider**: The provider contract and request/response metadata
//! - **Mock Provider**: Canned responses composed from header/body sources
//! - **Local Server**: Ordered provider registry, newest match wins
//! - **Engine**: Per-request header → body state machine with delays and
//!   cancellation
//! - **Interceptor**: Activation switch and dispatch entry point
//! - **Fixtures**: YAML-declared mocks
//!
//! # Architecture
//!
//! ```text
//! Application request
//!     │
//!     ├─ Interceptor (active?) ──no──→ real network
//!     │
//!     ├─ LocalServer::resolve ──none──→ real network
//!     │
//!     └─ LoadTask
//!          ├─ [header delay] → header() → on_header_received
//!          ├─ [body delay]   → body()   → on_body_chunk_received
//!          └─ on_completed  |  on_failed  |  (cancelled: silence)
//! ```

pub mod engine;
pub mod fixtures;
pub mod interceptor;
pub mod local_server;
pub mod mock_provider;
pub mod provider;
pub mod rule;

// Re-export commonly used types
pub use engine::{ChannelSink, LoadEvent, LoadState, LoadTask, RequestHandle, ResponseSink};
pub use fixtures::{MockDefinition, PatternKind};
pub use interceptor::{start, stop, Interceptor, InterceptorConfig, MockResponse};
pub use local_server::LocalServer;
pub use mock_provider::{BodySource, HeaderSource, MockProvider, MockProviderBuilder};
pub use provider::{InterceptedRequest, ProviderId, ResponseHeader, ResponseProvider, Timing};
pub use rule::{AnyRule, ExactRule, FnRule, GlobRule, RegexRule, Rule};
