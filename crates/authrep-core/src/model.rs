//! Proxy configuration as served by the system API
//!
//! The wire payload is decoded into `Raw*` types and then resolved into a
//! `ProxyConfig` whose mapping-rule patterns are compiled exactly once. A
//! resolved configuration is immutable and shared behind an `Arc`.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// `backend_version` value that selects the OpenID Connect pattern
pub const OIDC_BACKEND_VERSION: &str = "oauth";

/// Metric name to accumulated delta, ordered for stable backend queries
pub type Usage = BTreeMap<String, u64>;

/// How applications authenticate against the backend for this service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPattern {
    /// `user_key` style single key
    ApiKey,
    /// `app_id` plus optional `app_key`
    AppIdKey,
    /// Application identity taken from a verified token claim
    Oidc,
}

impl AuthPattern {
    fn from_backend_version(version: &str) -> Self {
        match version {
            "1" => AuthPattern::ApiKey,
            OIDC_BACKEND_VERSION => AuthPattern::Oidc,
            _ => AuthPattern::AppIdKey,
        }
    }
}

/// Credential the adapter itself presents to the backend
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BackendAuth {
    /// e.g. `service_token` or `provider_key`
    pub kind: String,
    pub value: String,
}

impl std::fmt::Debug for BackendAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAuth")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// One pattern-to-metric association
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub pattern: String,
    pub http_method: String,
    pub metric: String,
    pub delta: u64,
    /// `None` when the pattern failed to compile; such a rule never matches
    regex: Option<Regex>,
}

impl MappingRule {
    pub fn new(
        pattern: impl Into<String>,
        http_method: impl Into<String>,
        metric: impl Into<String>,
        delta: u64,
    ) -> Self {
        let pattern = pattern.into();
        let regex = match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "ignoring mapping rule with invalid pattern");
                None
            }
        };
        Self {
            pattern,
            http_method: http_method.into(),
            metric: metric.into(),
            delta,
            regex,
        }
    }

    /// Search (not full-match) the path and compare methods case-insensitively
    pub fn matches(&self, method: &str, path: &str) -> bool {
        let Some(re) = &self.regex else {
            return false;
        };
        self.http_method.eq_ignore_ascii_case(method) && re.is_match(path)
    }
}

/// Per-service routing and authentication configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Mapping rules in their configured order
    pub rules: Vec<MappingRule>,
    pub auth_pattern: AuthPattern,
    pub backend_auth: BackendAuth,
    /// Backend endpoint advertised by the system API
    pub backend_endpoint: Option<String>,
}

impl ProxyConfig {
    /// Whether application identity must come from the OIDC claim
    pub fn is_oidc(&self) -> bool {
        self.auth_pattern == AuthPattern::Oidc
    }
}

/// Top-level system API payload
#[derive(Debug, Clone, Deserialize)]
pub struct RawProxyConfigElement {
    pub proxy_config: RawProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProxyConfig {
    pub content: RawContent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub backend_version: String,
    #[serde(default)]
    pub backend_authentication_type: String,
    #[serde(default)]
    pub backend_authentication_value: String,
    pub proxy: RawProxy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProxy {
    #[serde(default)]
    pub backend: Option<RawBackend>,
    #[serde(default)]
    pub proxy_rules: Vec<RawProxyRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBackend {
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProxyRule {
    pub pattern: String,
    pub http_method: String,
    pub metric_system_name: String,
    #[serde(default)]
    pub delta: u64,
}

impl From<RawProxyConfigElement> for ProxyConfig {
    fn from(raw: RawProxyConfigElement) -> Self {
        let content = raw.proxy_config.content;
        let backend_endpoint = content
            .proxy
            .backend
            .map(|b| b.endpoint)
            .filter(|e| !e.is_empty());

        Self {
            rules: content
                .proxy
                .proxy_rules
                .into_iter()
                .map(|r| MappingRule::new(r.pattern, r.http_method, r.metric_system_name, r.delta))
                .collect(),
            auth_pattern: AuthPattern::from_backend_version(&content.backend_version),
            backend_auth: BackendAuth {
                kind: content.backend_authentication_type,
                value: content.backend_authentication_value,
            },
            backend_endpoint,
        }
    }
}
