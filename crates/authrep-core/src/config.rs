//! Per-request service configuration and deployment-level settings
//!
//! `ServiceConfig` is decoded from the opaque adapter-configuration blob that
//! arrives with every request. `AuthorizerConfig` is loaded once from YAML
//! and controls caching and network timeouts.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors raised while decoding configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("internal error - adapter config is not available")]
    MissingAdapterConfig,

    #[error("internal error - unable to unmarshal adapter config")]
    Unmarshal(#[source] serde_json::Error),

    #[error("invalid {kind} url")]
    InvalidUrl { kind: &'static str },
}

/// Per-request configuration carried in the adapter-configuration blob
///
/// All fields are optional on the wire; an absent string decodes as empty.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service identifier; may instead be supplied by the request action
    pub service_id: String,
    /// Base URL of the system API serving proxy configurations
    pub system_url: String,
    /// Access token for the system API
    pub access_token: String,
    /// Backend URL override; the proxy configuration endpoint is used when empty
    pub backend_url: String,
    /// Backend credential used when the proxy configuration carries none
    pub service_token: String,
}

impl ServiceConfig {
    /// Decode the adapter-configuration blob
    pub fn from_blob(blob: Option<&[u8]>) -> Result<Self, ConfigError> {
        let bytes = blob.ok_or(ConfigError::MissingAdapterConfig)?;
        serde_json::from_slice(bytes).map_err(ConfigError::Unmarshal)
    }

    /// Parsed system API base URL
    pub fn system_base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.system_url).ok_or(ConfigError::InvalidUrl { kind: "system" })
    }
}

// Tokens stay out of logs.
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service_id", &self.service_id)
            .field("system_url", &self.system_url)
            .field("access_token", &redacted(&self.access_token))
            .field("backend_url", &self.backend_url)
            .field("service_token", &redacted(&self.service_token))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

/// Parse a base URL, defaulting the scheme to https when none is given
pub(crate) fn parse_base_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let url = if raw.contains("://") {
        Url::parse(raw).ok()?
    } else {
        Url::parse(&format!("https://{raw}")).ok()?
    };
    if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(url)
}

/// Raw deployment configuration (parsed from YAML)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAuthorizerConfig {
    pub cache: Option<RawCacheConfig>,
    pub system: Option<RawEndpointConfig>,
    pub backend: Option<RawEndpointConfig>,
}

/// Proxy configuration cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCacheConfig {
    /// Whether proxy configurations are cached at all (default: true)
    #[serde(default = "defaults::cache_enabled")]
    pub enabled: bool,
    /// Freshness window in seconds (default: 300)
    #[serde(default = "defaults::cache_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Serve a stale entry when its refresh fails (default: true)
    #[serde(default = "defaults::serve_stale_on_error")]
    pub serve_stale_on_error: bool,
}

/// Timeout settings for a remote collaborator
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEndpointConfig {
    pub timeout_ms: Option<u64>,
}

mod defaults {
    pub fn cache_enabled() -> bool {
        true
    }
    pub fn cache_ttl_seconds() -> u64 {
        300
    }
    pub fn serve_stale_on_error() -> bool {
        true
    }
    pub fn system_timeout_ms() -> u64 {
        2000
    }
    pub fn backend_timeout_ms() -> u64 {
        1000
    }
}

/// Resolved cache settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::cache_enabled(),
            ttl: Duration::from_secs(defaults::cache_ttl_seconds()),
            serve_stale_on_error: defaults::serve_stale_on_error(),
        }
    }
}

impl From<RawCacheConfig> for CacheConfig {
    fn from(raw: RawCacheConfig) -> Self {
        Self {
            enabled: raw.enabled,
            ttl: Duration::from_secs(raw.ttl_seconds),
            serve_stale_on_error: raw.serve_stale_on_error,
        }
    }
}

/// Resolved deployment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizerConfig {
    pub cache: CacheConfig,
    /// Timeout for proxy configuration fetches
    pub system_timeout: Duration,
    /// Timeout for authorize-and-report calls
    pub backend_timeout: Duration,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            system_timeout: Duration::from_millis(defaults::system_timeout_ms()),
            backend_timeout: Duration::from_millis(defaults::backend_timeout_ms()),
        }
    }
}

impl From<RawAuthorizerConfig> for AuthorizerConfig {
    fn from(raw: RawAuthorizerConfig) -> Self {
        let timeout = |endpoint: Option<RawEndpointConfig>, default: u64| {
            Duration::from_millis(endpoint.and_then(|e| e.timeout_ms).unwrap_or(default))
        };
        Self {
            cache: raw.cache.map(CacheConfig::from).unwrap_or_default(),
            system_timeout: timeout(raw.system, defaults::system_timeout_ms()),
            backend_timeout: timeout(raw.backend, defaults::backend_timeout_ms()),
        }
    }
}

impl AuthorizerConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawAuthorizerConfig =
            serde_yaml::from_str(yaml).with_context(|| "Failed to parse authorizer config YAML")?;
        let config = Self::from(raw);

        if config.cache.enabled && config.cache.ttl.is_zero() {
            anyhow::bail!("cache.ttlSeconds must be positive when the cache is enabled");
        }

        Ok(config)
    }
}
