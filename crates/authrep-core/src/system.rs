//! Remote system API client for per-service proxy configurations

use crate::config::ServiceConfig;
use crate::model::{ProxyConfig, RawProxyConfigElement};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from a proxy configuration fetch
///
/// Transport errors are stored without their URL, which carries the access
/// token as a query parameter.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("invalid system url")]
    InvalidUrl,

    #[error("request failed: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    #[error("system returned status {0}")]
    Status(u16),

    #[error("malformed proxy configuration: {0}")]
    Malformed(String),
}

impl FetchError {
    /// HTTP status for metrics, if the system answered at all
    pub fn http_status(&self) -> Option<u16> {
        match self {
            FetchError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Source of proxy configurations
#[async_trait]
pub trait SystemClient: Send + Sync {
    async fn fetch_proxy_config(&self, config: &ServiceConfig) -> Result<ProxyConfig, FetchError>;
}

/// System API over HTTP
#[derive(Clone, Debug)]
pub struct HttpSystemClient {
    http: Client,
    timeout: Duration,
}

impl HttpSystemClient {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl SystemClient for HttpSystemClient {
    async fn fetch_proxy_config(&self, config: &ServiceConfig) -> Result<ProxyConfig, FetchError> {
        let mut url = config.system_base_url().map_err(|_| FetchError::InvalidUrl)?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl)?
            .pop_if_empty()
            .extend([
                "admin",
                "api",
                "services",
                config.service_id.as_str(),
                "proxy",
                "configs",
                "production",
                "latest.json",
            ]);

        debug!(service_id = %config.service_id, "fetching proxy configuration");

        let resp = self
            .http
            .get(url)
            .query(&[("access_token", config.access_token.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport(Arc::new(e.without_url())))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(Arc::new(e.without_url())))?;
        let raw: RawProxyConfigElement =
            serde_json::from_slice(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(ProxyConfig::from(raw))
    }
}
