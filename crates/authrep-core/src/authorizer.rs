//! Authorization decision pipeline
//!
//! Runs each request through
//! `ParsingConfig -> ResolvingServiceId -> FetchingProxyConfig ->
//! ValidatingCredentials -> MatchingRules -> CallingBackend -> Translating`.
//! The first failure short-circuits to translation; every request yields
//! exactly one `CheckResult`.

use crate::backend::{AuthRepRequest, AuthorizationResult, Backend, HttpBackend};
use crate::cache::ProxyConfigCache;
use crate::config::{parse_base_url, AuthorizerConfig, ServiceConfig};
use crate::credentials;
use crate::error::AuthzError;
use crate::mapping::match_usage;
use crate::metrics::MetricsSink;
use crate::model::{BackendAuth, ProxyConfig};
use crate::request::AuthorizationRequest;
use crate::status::{CheckResult, Code};
use crate::system::{HttpSystemClient, SystemClient};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

/// Pipeline stage, used to label failures in logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    ParsingConfig,
    ResolvingServiceId,
    FetchingProxyConfig,
    ValidatingCredentials,
    MatchingRules,
    CallingBackend,
    Translating,
}

#[derive(Debug, Default)]
struct Progress {
    stage: Stage,
    service_id: String,
}

/// Composes the proxy configuration cache and the backend into decisions
#[derive(Clone)]
pub struct Authorizer {
    cache: Arc<ProxyConfigCache>,
    backend: Arc<dyn Backend>,
}

impl Authorizer {
    pub fn new(cache: Arc<ProxyConfigCache>, backend: Arc<dyn Backend>) -> Self {
        Self { cache, backend }
    }

    /// Wire the default HTTP collaborators from deployment configuration
    pub fn from_config(config: &AuthorizerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let http = Client::new();
        let system: Arc<dyn SystemClient> =
            Arc::new(HttpSystemClient::new(http.clone(), config.system_timeout));
        let backend = Arc::new(HttpBackend::new(
            http,
            config.backend_timeout,
            metrics.clone(),
        ));
        let cache = Arc::new(ProxyConfigCache::new(config.cache.clone(), system, metrics));

        Self::new(cache, backend)
    }

    /// Proxy configuration cache, for maintenance such as `evict_expired`
    pub fn cache(&self) -> &ProxyConfigCache {
        &self.cache
    }

    /// Decide whether a request is authorized and report its usage
    ///
    /// Cancelling `cancel` abandons any in-flight network call. The result
    /// always disables caching at the host: usage has already been reported,
    /// and a cached decision would let later requests skip reporting.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        cancel: &CancellationToken,
    ) -> CheckResult {
        let mut progress = Progress::default();

        match self.run(request, cancel, &mut progress).await {
            Ok(()) => {
                debug!(service_id = %progress.service_id, "request authorized");
                CheckResult::ok()
            }
            Err(e) => {
                let status = e.to_status();
                if status.code == Code::PermissionDenied {
                    warn!(
                        service_id = %progress.service_id,
                        stage = ?progress.stage,
                        error = %e,
                        "request denied"
                    );
                } else {
                    error!(
                        service_id = %progress.service_id,
                        stage = ?progress.stage,
                        code = %status.code,
                        error = %e,
                        "authorization failed"
                    );
                }
                CheckResult::new(status)
            }
        }
    }

    async fn run(
        &self,
        request: &AuthorizationRequest,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<(), AuthzError> {
        let action = &request.instance.action;

        progress.stage = Stage::ParsingConfig;
        let mut service = ServiceConfig::from_blob(request.adapter_config.as_deref())?;

        // The service id may be pinned in the config or supplied per request.
        progress.stage = Stage::ResolvingServiceId;
        if service.service_id.is_empty() {
            if action.service.is_empty() {
                return Err(AuthzError::MissingServiceId);
            }
            service.service_id = action.service.clone();
        }
        progress.service_id = service.service_id.clone();

        progress.stage = Stage::FetchingProxyConfig;
        service
            .system_base_url()
            .map_err(|_| AuthzError::InvalidSystemUrl)?;
        let proxy = cancellable(cancel, self.cache.get(&service)).await??;
        let backend_url = backend_url(&service, &proxy)?;

        progress.stage = Stage::ValidatingCredentials;
        if action.path.is_empty() {
            return Err(AuthzError::MissingPath);
        }
        let credentials = credentials::resolve(&proxy, request.instance.subject.as_ref())?;

        progress.stage = Stage::MatchingRules;
        let usage = match_usage(&action.method, &action.path, &proxy);
        if usage.is_empty() {
            return Err(AuthzError::NoMatchingRule {
                method: action.method.clone(),
                path: action.path.clone(),
            });
        }

        progress.stage = Stage::CallingBackend;
        let auth_rep = AuthRepRequest {
            backend_url,
            service_id: service.service_id.clone(),
            auth: backend_auth(&service, &proxy),
            credentials,
            usage,
        };
        let result = cancellable(cancel, self.backend.auth_rep(&auth_rep)).await?;

        progress.stage = Stage::Translating;
        match AuthorizationResult::from(result) {
            AuthorizationResult::Authorized => Ok(()),
            AuthorizationResult::Denied(reason) => Err(AuthzError::Denied(reason)),
            AuthorizationResult::Unavailable(reason) => Err(AuthzError::Backend(reason)),
        }
    }
}

/// Run `fut` unless the caller goes away first
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, AuthzError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthzError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Backend URL override first, then the endpoint advertised by the system
fn backend_url(service: &ServiceConfig, proxy: &ProxyConfig) -> Result<Url, AuthzError> {
    let raw = if service.backend_url.is_empty() {
        proxy.backend_endpoint.as_deref().unwrap_or_default()
    } else {
        service.backend_url.as_str()
    };
    parse_base_url(raw).ok_or(AuthzError::InvalidBackendUrl)
}

fn backend_auth(service: &ServiceConfig, proxy: &ProxyConfig) -> BackendAuth {
    if proxy.backend_auth.value.is_empty() && !service.service_token.is_empty() {
        return BackendAuth {
            kind: "service_token".to_string(),
            value: service.service_token.clone(),
        };
    }
    proxy.backend_auth.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthRepResponse, BackendError};
    use crate::config::CacheConfig;
    use crate::metrics::NoopMetrics;
    use crate::model::{AuthPattern, MappingRule};
    use crate::request::{Action, Instance, Subject};
    use crate::system::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StaticSystem {
        result: fn() -> Result<ProxyConfig, FetchError>,
    }

    #[async_trait]
    impl SystemClient for StaticSystem {
        async fn fetch_proxy_config(
            &self,
            _config: &ServiceConfig,
        ) -> Result<ProxyConfig, FetchError> {
            (self.result)()
        }
    }

    /// Never answers
    struct HangingSystem;

    #[async_trait]
    impl SystemClient for HangingSystem {
        async fn fetch_proxy_config(
            &self,
            _config: &ServiceConfig,
        ) -> Result<ProxyConfig, FetchError> {
            std::future::pending().await
        }
    }

    fn widgets_config() -> Result<ProxyConfig, FetchError> {
        Ok(ProxyConfig {
            rules: vec![MappingRule::new("/v1/widgets", "GET", "hits", 1)],
            auth_pattern: AuthPattern::AppIdKey,
            backend_auth: BackendAuth {
                kind: "service_token".to_string(),
                value: "st".to_string(),
            },
            backend_endpoint: Some("https://backend.example.com".to_string()),
        })
    }

    fn oidc_config() -> Result<ProxyConfig, FetchError> {
        widgets_config().map(|c| ProxyConfig {
            auth_pattern: AuthPattern::Oidc,
            ..c
        })
    }

    fn unavailable() -> Result<ProxyConfig, FetchError> {
        Err(FetchError::Status(503))
    }

    /// Records every call and answers with a fixed verdict
    struct FakeBackend {
        calls: Mutex<Vec<AuthRepRequest>>,
        verdict: fn() -> Result<AuthRepResponse, BackendError>,
        hang: bool,
    }

    impl FakeBackend {
        fn new(verdict: fn() -> Result<AuthRepResponse, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                verdict,
                hang: false,
            })
        }

        fn calls(&self) -> Vec<AuthRepRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn auth_rep(
            &self,
            request: &AuthRepRequest,
        ) -> Result<AuthRepResponse, BackendError> {
            self.calls.lock().unwrap().push(request.clone());
            if self.hang {
                std::future::pending::<()>().await;
            }
            (self.verdict)()
        }
    }

    fn authorized() -> Result<AuthRepResponse, BackendError> {
        Ok(AuthRepResponse {
            success: true,
            reason: String::new(),
        })
    }

    fn limits_exceeded() -> Result<AuthRepResponse, BackendError> {
        Ok(AuthRepResponse {
            success: false,
            reason: "usage limits are exceeded".to_string(),
        })
    }

    fn backend_down() -> Result<AuthRepResponse, BackendError> {
        Err(BackendError::Status(502))
    }

    fn authorizer(
        system: fn() -> Result<ProxyConfig, FetchError>,
        backend: Arc<FakeBackend>,
    ) -> Authorizer {
        let cache = ProxyConfigCache::new(
            CacheConfig::default(),
            Arc::new(StaticSystem { result: system }),
            Arc::new(NoopMetrics),
        );
        Authorizer::new(Arc::new(cache), backend)
    }

    fn request(method: &str, path: &str, props: &[(&str, &str)]) -> AuthorizationRequest {
        AuthorizationRequest {
            adapter_config: Some(
                br#"{"service_id":"123","system_url":"https://admin.example.com","access_token":"tok"}"#
                    .to_vec(),
            ),
            instance: Instance {
                subject: Some(Subject {
                    user: String::new(),
                    properties: props
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<HashMap<_, _>>(),
                }),
                action: Action {
                    service: String::new(),
                    method: method.to_string(),
                    path: path.to_string(),
                },
            },
        }
    }

    async fn check(authz: &Authorizer, req: &AuthorizationRequest) -> CheckResult {
        authz.authorize(req, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_authorized_request() {
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(widgets_config, backend.clone());

        let result = check(&authz, &request("GET", "/v1/widgets", &[("app_id", "abc")])).await;

        assert!(result.is_ok());
        assert_eq!(result.valid_duration, Duration::ZERO);
        assert!(result.valid_use_count < 0);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service_id, "123");
        assert_eq!(calls[0].credentials.app_id, "abc");
        assert_eq!(calls[0].usage.get("hits"), Some(&1));
        assert_eq!(calls[0].backend_url.as_str(), "https://backend.example.com/");
    }

    #[tokio::test]
    async fn test_backend_denial_carries_reason() {
        let authz = authorizer(widgets_config, FakeBackend::new(limits_exceeded));

        let result = check(&authz, &request("GET", "/v1/widgets", &[("app_id", "abc")])).await;

        assert_eq!(result.code(), Code::PermissionDenied);
        assert_eq!(result.status.message, "usage limits are exceeded");
        assert!(result.valid_use_count < 0);
    }

    #[tokio::test]
    async fn test_backend_error_is_unknown() {
        let authz = authorizer(widgets_config, FakeBackend::new(backend_down));

        let result = check(&authz, &request("GET", "/v1/widgets", &[("app_id", "abc")])).await;

        assert_eq!(result.code(), Code::Unknown);
        assert_eq!(result.status.message, "error calling backend");
    }

    #[tokio::test]
    async fn test_missing_credentials_denied() {
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(widgets_config, backend.clone());

        let result = check(&authz, &request("GET", "/v1/widgets", &[])).await;

        assert_eq!(result.code(), Code::PermissionDenied);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_oidc_uses_claim() {
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(oidc_config, backend.clone());

        let req = request(
            "GET",
            "/v1/widgets",
            &[("app_id", "spoofed"), ("client_id", "from-token")],
        );
        assert!(check(&authz, &req).await.is_ok());
        assert_eq!(backend.calls()[0].credentials.app_id, "from-token");
    }

    #[tokio::test]
    async fn test_no_matching_rule() {
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(widgets_config, backend.clone());

        let result = check(&authz, &request("DELETE", "/v1/widgets", &[("app_id", "abc")])).await;

        assert_eq!(result.code(), Code::PermissionDenied);
        assert!(result.status.message.contains("DELETE"));
        assert!(result.status.message.contains("/v1/widgets"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_path() {
        let authz = authorizer(widgets_config, FakeBackend::new(authorized));

        let result = check(&authz, &request("GET", "", &[("app_id", "abc")])).await;

        assert_eq!(result.code(), Code::InvalidArgument);
        assert_eq!(result.status.message, "missing request path");
    }

    #[tokio::test]
    async fn test_unparsable_adapter_config() {
        let authz = authorizer(widgets_config, FakeBackend::new(authorized));

        let mut req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        req.adapter_config = Some(b"{not-json".to_vec());
        assert_eq!(check(&authz, &req).await.code(), Code::Internal);

        req.adapter_config = None;
        assert_eq!(check(&authz, &req).await.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_service_id_from_action() {
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(widgets_config, backend.clone());

        let mut req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        req.adapter_config = Some(br#"{"system_url":"https://admin.example.com"}"#.to_vec());
        req.instance.action.service = "777".to_string();

        assert!(check(&authz, &req).await.is_ok());
        assert_eq!(backend.calls()[0].service_id, "777");
    }

    #[tokio::test]
    async fn test_missing_service_id() {
        let authz = authorizer(widgets_config, FakeBackend::new(authorized));

        let mut req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        req.adapter_config = Some(br#"{"system_url":"https://admin.example.com"}"#.to_vec());

        assert_eq!(check(&authz, &req).await.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_invalid_system_url() {
        let authz = authorizer(widgets_config, FakeBackend::new(authorized));

        let mut req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        req.adapter_config = Some(br#"{"service_id":"1","system_url":""}"#.to_vec());

        assert_eq!(check(&authz, &req).await.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_system_unavailable() {
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(unavailable, backend.clone());

        let result = check(&authz, &request("GET", "/v1/widgets", &[("app_id", "abc")])).await;

        assert_eq!(result.code(), Code::Unavailable);
        assert!(!result.status.message.contains("admin.example.com"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_url_override_and_service_token() {
        fn no_backend_auth() -> Result<ProxyConfig, FetchError> {
            widgets_config().map(|c| ProxyConfig {
                backend_auth: BackendAuth::default(),
                ..c
            })
        }
        let backend = FakeBackend::new(authorized);
        let authz = authorizer(no_backend_auth, backend.clone());

        let mut req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        req.adapter_config = Some(
            br#"{"service_id":"123","system_url":"https://admin.example.com","backend_url":"http://su1.example.com:3000","service_token":"svc"}"#
                .to_vec(),
        );

        assert!(check(&authz, &req).await.is_ok());
        let call = &backend.calls()[0];
        assert_eq!(call.backend_url.as_str(), "http://su1.example.com:3000/");
        assert_eq!(call.auth.kind, "service_token");
        assert_eq!(call.auth.value, "svc");
    }

    #[tokio::test]
    async fn test_cancelled_request_abandons_backend_call() {
        let backend = Arc::new(FakeBackend {
            calls: Mutex::new(vec![]),
            verdict: authorized,
            hang: true,
        });
        let authz = authorizer(widgets_config, backend.clone());
        let cancel = CancellationToken::new();

        let req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        let pending = authz.authorize(&req, &cancel);
        let canceller = async {
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(pending, canceller);

        assert_eq!(result.code(), Code::Unavailable);
        assert_eq!(result.status.message, "request cancelled");
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_fetching_proxy_config() {
        let backend = FakeBackend::new(authorized);
        let cache = ProxyConfigCache::new(
            CacheConfig::default(),
            Arc::new(HangingSystem),
            Arc::new(NoopMetrics),
        );
        let authz = Authorizer::new(Arc::new(cache), backend.clone());
        let cancel = CancellationToken::new();

        let req = request("GET", "/v1/widgets", &[("app_id", "abc")]);
        let pending = authz.authorize(&req, &cancel);
        let canceller = async {
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(pending, canceller);

        assert_eq!(result.code(), Code::Unavailable);
        assert_eq!(result.status.message, "request cancelled");
        assert!(backend.calls().is_empty());
        assert!(authz.cache().is_empty());
    }
}
