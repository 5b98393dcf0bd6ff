//! authrep-core: authorization decisions with combined usage reporting
//!
//! Sits between a gateway's policy check and a remote usage-accounting
//! backend. For every request it resolves the service's proxy configuration,
//! extracts the caller's credentials, maps method and path to billable
//! metrics and issues one authorize-and-report call.
//!
//! # Features
//!
//! - **Proxy configuration cache**: per-service, freshness-bounded, single-flight
//!   refreshes, optional stale fallback when the system API is down
//! - **Mapping rules**: regex search over the path, per-metric accumulation
//! - **OIDC aware**: application identity comes from the token claim when the
//!   service uses OpenID Connect
//! - **AuthRep**: authorization and usage reporting in a single backend call
//!
//! # Example
//!
//! ```rust,ignore
//! use authrep_core::{AuthorizationRequest, Authorizer, AuthorizerConfig, NoopMetrics};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let authorizer = Authorizer::from_config(&AuthorizerConfig::default(), Arc::new(NoopMetrics));
//!
//! let result = authorizer
//!     .authorize(&request, &CancellationToken::new())
//!     .await;
//!
//! if !result.is_ok() {
//!     println!("{}: {}", result.status.code, result.status.message);
//! }
//! ```

pub mod authorizer;
pub mod backend;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod model;
pub mod request;
pub mod status;
pub mod system;

// Re-export public types
pub use authorizer::{Authorizer, Stage};
pub use backend::{AuthRepRequest, AuthRepResponse, AuthorizationResult, Backend, BackendError, HttpBackend};
pub use cache::{sha256_hex, CacheEntry, ProxyConfigCache};
pub use config::{AuthorizerConfig, CacheConfig, ConfigError, ServiceConfig};
pub use credentials::Credentials;
pub use error::AuthzError;
pub use mapping::match_usage;
pub use metrics::{EventStatus, MetricEvent, MetricsSink, NoopMetrics, PrometheusMetrics, Target};
pub use model::{AuthPattern, BackendAuth, MappingRule, ProxyConfig, Usage};
pub use request::{Action, AuthorizationRequest, Instance, Subject};
pub use status::{CheckResult, Code, Status};
pub use system::{FetchError, HttpSystemClient, SystemClient};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::authorizer::Authorizer;
    pub use crate::backend::Backend;
    pub use crate::config::{AuthorizerConfig, ServiceConfig};
    pub use crate::metrics::{MetricsSink, NoopMetrics};
    pub use crate::request::{Action, AuthorizationRequest, Instance, Subject};
    pub use crate::status::{CheckResult, Code};
    pub use crate::system::SystemClient;
}
