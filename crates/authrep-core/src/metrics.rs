//! Latency and status events for cache lookups, system fetches and backend calls
//!
//! Sinks are invoked inline on the request path, so implementations must be
//! cheap, non-blocking and infallible.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Which collaborator an event describes
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Target {
    /// Proxy configuration served fresh from the cache
    SystemCache,
    /// Remote proxy configuration fetch
    System,
    /// Authorize-and-report call
    Backend,
}

/// Outcome of the observed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Hit,
    /// HTTP status returned by the remote side
    Http(u16),
    /// No HTTP response (connect failure, timeout, cancellation)
    Transport,
}

impl EventStatus {
    pub fn label(&self) -> String {
        match self {
            EventStatus::Hit => "hit".to_string(),
            EventStatus::Http(code) => code.to_string(),
            EventStatus::Transport => "error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub service_id: String,
    pub target: Target,
    pub latency: Duration,
    pub status: EventStatus,
}

/// Metrics callback trait for cache and network events
///
/// Implement this to integrate with your metrics system.
pub trait MetricsSink: Send + Sync {
    fn report(&self, event: MetricEvent);
}

/// No-op metrics implementation for testing
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn report(&self, _event: MetricEvent) {}
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    service_id: String,
    target: Target,
    status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct LatencyLabels {
    service_id: String,
    target: Target,
}

fn latency_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.001, 2.0, 14))
}

/// Prometheus-backed sink
#[derive(Clone)]
pub struct PrometheusMetrics {
    requests: Family<RequestLabels, Counter>,
    latency: Family<LatencyLabels, Histogram, fn() -> Histogram>,
}

impl PrometheusMetrics {
    /// Create the metric families and register them under `registry`
    pub fn new(registry: &mut Registry) -> Self {
        let requests = Family::<RequestLabels, Counter>::default();
        let latency = Family::<LatencyLabels, Histogram, fn() -> Histogram>::new_with_constructor(
            latency_histogram,
        );

        registry.register(
            "authrep_requests",
            "Cache lookups and remote calls by service, target and status",
            requests.clone(),
        );
        registry.register(
            "authrep_latency_seconds",
            "Latency of cache lookups and remote calls",
            latency.clone(),
        );

        Self { requests, latency }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn report(&self, event: MetricEvent) {
        self.requests
            .get_or_create(&RequestLabels {
                service_id: event.service_id.clone(),
                target: event.target,
                status: event.status.label(),
            })
            .inc();
        self.latency
            .get_or_create(&LatencyLabels {
                service_id: event.service_id,
                target: event.target,
            })
            .observe(event.latency.as_secs_f64());
    }
}
