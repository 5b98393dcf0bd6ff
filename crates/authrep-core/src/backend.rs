//! Combined authorize-and-report calls against the usage-accounting backend

use crate::credentials::Credentials;
use crate::metrics::{EventStatus, MetricEvent, MetricsSink, Target};
use crate::model::{BackendAuth, Usage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Backend call failed before producing a verdict
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// One authorize-and-report transaction
#[derive(Debug, Clone)]
pub struct AuthRepRequest {
    pub backend_url: Url,
    pub service_id: String,
    pub auth: BackendAuth,
    pub credentials: Credentials,
    pub usage: Usage,
}

/// Verdict returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthRepResponse {
    #[serde(rename = "authorized")]
    pub success: bool,
    #[serde(default)]
    pub reason: String,
}

/// Tri-state outcome of the backend stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Authorized,
    Denied(String),
    Unavailable(String),
}

impl From<Result<AuthRepResponse, BackendError>> for AuthorizationResult {
    fn from(result: Result<AuthRepResponse, BackendError>) -> Self {
        match result {
            Ok(resp) if resp.success => AuthorizationResult::Authorized,
            Ok(resp) => AuthorizationResult::Denied(resp.reason),
            Err(e) => AuthorizationResult::Unavailable(e.to_string()),
        }
    }
}

/// Capability to authorize a request and report its usage in one call
///
/// Implementations issue exactly one call per invocation; retries belong to
/// the transport underneath.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn auth_rep(&self, request: &AuthRepRequest) -> Result<AuthRepResponse, BackendError>;
}

/// Default backend speaking the `transactions/authrep.json` endpoint
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl HttpBackend {
    pub fn new(http: Client, timeout: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            http,
            timeout,
            metrics,
        }
    }

    fn query(request: &AuthRepRequest) -> Vec<(String, String)> {
        let mut query = vec![("service_id".to_string(), request.service_id.clone())];

        if !request.auth.value.is_empty() {
            let kind = if request.auth.kind.is_empty() {
                "service_token"
            } else {
                request.auth.kind.as_str()
            };
            query.push((kind.to_string(), request.auth.value.clone()));
        }

        let creds = &request.credentials;
        for (name, value) in [
            ("app_id", &creds.app_id),
            ("app_key", &creds.app_key),
            ("user_key", &creds.user_key),
        ] {
            if !value.is_empty() {
                query.push((name.to_string(), value.clone()));
            }
        }

        for (metric, delta) in &request.usage {
            query.push((format!("usage[{metric}]"), delta.to_string()));
        }

        query
    }

    fn endpoint(base: &Url) -> Url {
        let mut url = base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["transactions", "authrep.json"]);
        }
        url
    }

    fn report(&self, service_id: &str, start: Instant, status: EventStatus) {
        self.metrics.report(MetricEvent {
            service_id: service_id.to_string(),
            target: Target::Backend,
            latency: start.elapsed(),
            status,
        });
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn auth_rep(&self, request: &AuthRepRequest) -> Result<AuthRepResponse, BackendError> {
        let start = Instant::now();
        let result = self
            .http
            .get(Self::endpoint(&request.backend_url))
            .query(&Self::query(request))
            .timeout(self.timeout)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.report(&request.service_id, start, EventStatus::Transport);
                return Err(BackendError::Transport(e.without_url()));
            }
        };

        let status = resp.status();
        self.report(&request.service_id, start, EventStatus::Http(status.as_u16()));

        // 409 carries a well-formed denial; anything else but 200 is a failure.
        if status != StatusCode::OK && status != StatusCode::CONFLICT {
            return Err(BackendError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.without_url()))?;
        let verdict: AuthRepResponse =
            serde_json::from_slice(&body).map_err(|e| BackendError::Malformed(e.to_string()))?;

        debug!(
            service_id = %request.service_id,
            authorized = verdict.success,
            "backend authrep completed"
        );
        Ok(verdict)
    }
}
