//! Proxy configuration cache
//!
//! Maps a service to its most recently fetched `ProxyConfig`. Entries are
//! replaced wholesale on refresh and shared behind an `Arc`, so readers never
//! block each other. Refreshes are single-flight per key: concurrent requests
//! for a missing or stale service wait on the one in-flight fetch and share
//! its outcome, success or failure, instead of fetching again.

use crate::config::{CacheConfig, ServiceConfig};
use crate::metrics::{EventStatus, MetricEvent, MetricsSink, Target};
use crate::model::ProxyConfig;
use crate::system::{FetchError, SystemClient};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cached proxy configuration
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub config: Arc<ProxyConfig>,
    /// When the configuration was fetched
    pub fetched_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

/// A service as seen through one system account
///
/// The account is a hash of system URL and access token, so raw credentials
/// are never held as keys.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    service_id: String,
    account: String,
}

impl CacheKey {
    fn new(config: &ServiceConfig) -> Self {
        Self {
            service_id: config.service_id.clone(),
            account: sha256_hex(&format!("{}|{}", config.system_url, config.access_token)),
        }
    }
}

/// Refresh coordination for one key
#[derive(Default)]
struct Flight {
    /// Error of the most recent attempt, `None` after a success
    last_error: AsyncMutex<Option<FetchError>>,
    /// Completed attempts; bumped while `last_error` is held
    attempts: AtomicU64,
}

/// Thread-safe, single-flight proxy configuration cache
pub struct ProxyConfigCache {
    settings: CacheConfig,
    system: Arc<dyn SystemClient>,
    metrics: Arc<dyn MetricsSink>,
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    flights: DashMap<CacheKey, Arc<Flight>>,
}

impl ProxyConfigCache {
    pub fn new(
        settings: CacheConfig,
        system: Arc<dyn SystemClient>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            settings,
            system,
            metrics,
            entries: DashMap::new(),
            flights: DashMap::new(),
        }
    }

    /// Return the proxy configuration for a service
    ///
    /// Fresh entries are served without a network call. Missing or stale
    /// entries are refreshed from the system API; when that refresh fails and
    /// `serve_stale_on_error` is set, the stale entry is returned instead of
    /// the error. Requests queued behind a failed refresh get the same answer
    /// without fetching again. With the cache disabled every call fetches
    /// remotely.
    pub async fn get(&self, config: &ServiceConfig) -> Result<Arc<ProxyConfig>, FetchError> {
        if !self.settings.enabled {
            return self.fetch(config).await.map(Arc::new);
        }

        let key = CacheKey::new(config);
        let start = Instant::now();

        if let Some(proxy_config) = self.fresh(&key) {
            self.report_hit(&config.service_id, start);
            return Ok(proxy_config);
        }

        let flight = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Flight::default()))
            .clone();
        let result = self.refresh(&key, &flight, config, start).await;

        // Last one out removes the flight; the map holds the other reference.
        drop(flight);
        self.flights
            .remove_if(&key, |_, flight| Arc::strong_count(flight) == 1);

        result
    }

    async fn refresh(
        &self,
        key: &CacheKey,
        flight: &Flight,
        config: &ServiceConfig,
        start: Instant,
    ) -> Result<Arc<ProxyConfig>, FetchError> {
        let seen = flight.attempts.load(Ordering::Acquire);
        let mut last_error = flight.last_error.lock().await;

        // Another request may have refreshed the entry while we waited.
        if let Some(proxy_config) = self.fresh(key) {
            self.report_hit(&config.service_id, start);
            return Ok(proxy_config);
        }

        // Or it may have tried and failed; share that outcome.
        if flight.attempts.load(Ordering::Acquire) != seen {
            if let Some(e) = last_error.as_ref() {
                return self.fallback(key, config, e.clone());
            }
        }

        let result = self.fetch(config).await;
        flight.attempts.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(proxy_config) => {
                *last_error = None;
                let proxy_config = Arc::new(proxy_config);
                self.entries.insert(
                    key.clone(),
                    Arc::new(CacheEntry {
                        config: proxy_config.clone(),
                        fetched_at: Instant::now(),
                    }),
                );
                Ok(proxy_config)
            }
            Err(e) => {
                *last_error = Some(e.clone());
                self.fallback(key, config, e)
            }
        }
    }

    /// Serve the stale entry for a failed refresh when allowed
    fn fallback(
        &self,
        key: &CacheKey,
        config: &ServiceConfig,
        error: FetchError,
    ) -> Result<Arc<ProxyConfig>, FetchError> {
        let stale = self.entries.get(key).map(|entry| entry.value().clone());
        match stale {
            Some(entry) if self.settings.serve_stale_on_error => {
                warn!(
                    service_id = %config.service_id,
                    error = %error,
                    age_secs = entry.fetched_at.elapsed().as_secs(),
                    "proxy configuration refresh failed, serving stale entry"
                );
                Ok(entry.config.clone())
            }
            _ => Err(error),
        }
    }

    /// Drop every cached entry for a service
    pub fn invalidate(&self, service_id: &str) {
        self.entries.retain(|key, _| key.service_id != service_id);
    }

    /// Get the number of entries in the cache (for metrics)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all stale entries (call periodically for cleanup)
    ///
    /// This also forgets the stale fallback for those services.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let ttl = self.settings.ttl;
        self.entries.retain(|_, entry| entry.is_fresh(ttl, now));
    }

    fn fresh(&self, key: &CacheKey) -> Option<Arc<ProxyConfig>> {
        let entry = self.entries.get(key)?.value().clone();
        entry
            .is_fresh(self.settings.ttl, Instant::now())
            .then(|| entry.config.clone())
    }

    async fn fetch(&self, config: &ServiceConfig) -> Result<ProxyConfig, FetchError> {
        let start = Instant::now();
        let result = self.system.fetch_proxy_config(config).await;

        let status = match &result {
            Ok(_) => EventStatus::Http(200),
            Err(e) => e
                .http_status()
                .map(EventStatus::Http)
                .unwrap_or(EventStatus::Transport),
        };
        self.metrics.report(MetricEvent {
            service_id: config.service_id.clone(),
            target: Target::System,
            latency: start.elapsed(),
            status,
        });

        if let Err(e) = &result {
            debug!(service_id = %config.service_id, error = %e, "proxy configuration fetch failed");
        }
        result
    }

    fn report_hit(&self, service_id: &str, start: Instant) {
        self.metrics.report(MetricEvent {
            service_id: service_id.to_string(),
            target: Target::SystemCache,
            latency: start.elapsed(),
            status: EventStatus::Hit,
        });
    }
}

/// Compute SHA-256 hash of input string, returned as lowercase hex
pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let out = hasher.finalize();
    base16ct::lower::encode_string(&out)
}
