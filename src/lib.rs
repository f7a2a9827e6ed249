// src/lib.rs
//! In-process HTTP request interception
//!
//! This library answers an application's outgoing HTTP requests locally from
//! registered mock providers, simulating successful responses, failures and
//! latency without touching the network.
//!
//! # Architecture
//!
//! The crate is structured into a few modules:
//!
//! - **interception**: Rules, providers, the provider registry, the
//!   per-request engine and the activation switch
//! - **observability**: Logging setup
//! - **utils**: Errors and settings
//!
//! # Example
//!
//! ```ignore
//! use mock_interceptor::{Interceptor, InterceptedRequest, MockProvider};
//!
//! let server = Interceptor::shared().server();
//! server.add(
//!     MockProvider::for_pattern(r"https://api\.example\.com/users/\d+")?
//!         .with_json(serde_json::json!({ "name": "Ada" }))
//!         .build(),
//! );
//!
//! let response = Interceptor::shared()
//!     .fetch(InterceptedRequest::get("https://api.example.com/users/1"))
//!     .await;
//! ```

// Public module exports
pub mod interception;
pub mod observability;
pub mod utils;

// Re-export commonly used types
pub use interception::{
    start, stop, InterceptedRequest, Interceptor, LocalServer, MockProvider, MockResponse,
    ResponseHeader, ResponseProvider, Timing,
};
pub use utils::config::InterceptorSettings;
pub use utils::errors::{InterceptError, LoadError, ProviderError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
