//! Prometheus Metrics Definitions
//!
//! Defines all RELIEF metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::ApiCache;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Broker publish latency buckets (seconds), retries included
const PUBLISH_LATENCY_BUCKETS: &[f64] = &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<ReliefMetrics>> = Lazy::new(ReliefMetrics::new);

/// Outcome label for one cached read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Error,
}

impl CacheOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Error => "error",
        }
    }
}

/// Outcome label for one report submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Invalid,
    BrokerUnavailable,
}

impl PublishOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            PublishOutcome::Accepted => "accepted",
            PublishOutcome::Invalid => "invalid",
            PublishOutcome::BrokerUnavailable => "broker_unavailable",
        }
    }
}

/// Container for all RELIEF metrics.
#[derive(Clone)]
pub struct ReliefMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Cached reads - labels: outcome (hit/miss/error)
    pub cache_lookups_total: CounterVec,

    /// Origin fetch duration on cache misses - labels: path
    pub origin_fetch_duration_seconds: HistogramVec,

    /// Entries currently stored in the response cache
    pub cache_entries: Gauge,

    /// Origin fetches currently in flight
    pub cache_in_flight: Gauge,

    /// Report submissions - labels: outcome
    pub reports_total: CounterVec,

    /// Time from validated report to broker acknowledgment
    pub publish_duration_seconds: Histogram,
}

impl ReliefMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "relief_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "relief_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            cache_lookups_total: register_counter_vec!(
                "relief_cache_lookups_total",
                "Cached read lookups by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,

            origin_fetch_duration_seconds: register_histogram_vec!(
                "relief_origin_fetch_duration_seconds",
                "Origin fetch duration on cache misses in seconds",
                &["path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register origin_fetch_duration_seconds: {}", e)))?,

            cache_entries: register_gauge!(
                "relief_cache_entries",
                "Entries currently stored in the response cache"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_entries: {}", e)))?,

            cache_in_flight: register_gauge!(
                "relief_cache_in_flight",
                "Origin fetches currently in flight"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_in_flight: {}", e)))?,

            reports_total: register_counter_vec!(
                "relief_reports_total",
                "Report submissions by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register reports_total: {}", e)))?,

            publish_duration_seconds: register_histogram!(
                "relief_publish_duration_seconds",
                "Broker publish duration in seconds, retries included",
                PUBLISH_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register publish_duration_seconds: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_cache_lookup(&self, outcome: CacheOutcome) {
        self.cache_lookups_total
            .with_label_values(&[outcome.as_label()])
            .inc();
    }

    pub fn record_origin_fetch(&self, path: &str, duration_secs: f64) {
        self.origin_fetch_duration_seconds
            .with_label_values(&[path])
            .observe(duration_secs);
    }

    /// Record a report submission; `publish_secs` is set once the broker
    /// was actually involved.
    pub fn record_report(&self, outcome: PublishOutcome, publish_secs: Option<f64>) {
        self.reports_total
            .with_label_values(&[outcome.as_label()])
            .inc();
        if let Some(secs) = publish_secs {
            self.publish_duration_seconds.observe(secs);
        }
    }

    pub fn set_cache_gauges(&self, entries: u64, in_flight: u64) {
        self.cache_entries.set(entries as f64);
        self.cache_in_flight.set(in_flight as f64);
    }
}

/// Run `f` against the global metrics, if they registered.
pub fn with_metrics(f: impl FnOnce(&ReliefMetrics)) {
    match METRICS.as_ref() {
        Ok(metrics) => f(metrics),
        Err(e) => tracing::trace!(error = %e, "Metrics unavailable"),
    }
}

/// Handler for the /metrics endpoint.
pub async fn metrics_handler(State(cache): State<ApiCache>) -> impl IntoResponse {
    let stats = cache.stats();
    with_metrics(|m| m.set_cache_gauges(stats.entries, stats.in_flight));

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
