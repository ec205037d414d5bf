//! # Prometheus Metrics
//!
//! Operational metrics for the flow endpoint, scraped from `/metrics` on
//! the dedicated metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] so they do not
//! collide with any default global registry consumers. The counters are
//! deliberately coarse — they count protocol-level events, never anything
//! derived from decrypted content.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the endpoint's metrics.
pub type SharedMetrics = Arc<FlowMetrics>;

/// Holds all Prometheus metric handles for the endpoint.
#[derive(Clone)]
pub struct FlowMetrics {
    /// Registry that owns every metric below.
    registry: Registry,
    /// Total flow endpoint requests, whatever their outcome.
    pub requests_total: IntCounter,
    /// Requests rejected before any crypto (HTTP 400).
    pub malformed_total: IntCounter,
    /// Requests whose envelope failed to decrypt (HTTP 421).
    pub decrypt_failures_total: IntCounter,
    /// Duplicate deliveries served from the replay cache.
    pub replays_total: IntCounter,
    /// Transitions no defined (action, screen) combination matched.
    pub transition_faults_total: IntCounter,
    /// Incidents successfully handed to the downstream pipeline.
    pub incidents_created_total: IntCounter,
    /// Downstream dispatch attempts that failed or timed out.
    pub incidents_failed_total: IntCounter,
    /// Sessions currently held by the store, terminal stragglers included.
    pub live_sessions: IntGauge,
    /// End-to-end flow request latency in seconds.
    pub request_duration_seconds: Histogram,
}

impl FlowMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("lifeline".into()), None)
            .expect("failed to create prometheus registry");

        let requests_total = IntCounter::new(
            "flow_requests_total",
            "Total flow endpoint requests received",
        )
        .expect("metric creation");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration");

        let malformed_total = IntCounter::new(
            "flow_malformed_total",
            "Requests rejected as malformed before any cryptographic operation",
        )
        .expect("metric creation");
        registry
            .register(Box::new(malformed_total.clone()))
            .expect("metric registration");

        let decrypt_failures_total = IntCounter::new(
            "flow_decrypt_failures_total",
            "Requests whose envelope failed key unwrap or payload authentication",
        )
        .expect("metric creation");
        registry
            .register(Box::new(decrypt_failures_total.clone()))
            .expect("metric registration");

        let replays_total = IntCounter::new(
            "flow_replays_total",
            "Duplicate deliveries answered from the replay cache",
        )
        .expect("metric creation");
        registry
            .register(Box::new(replays_total.clone()))
            .expect("metric registration");

        let transition_faults_total = IntCounter::new(
            "flow_transition_faults_total",
            "Requests that matched no defined action/screen transition",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transition_faults_total.clone()))
            .expect("metric registration");

        let incidents_created_total = IntCounter::new(
            "flow_incidents_created_total",
            "Incidents handed to the downstream dispatch pipeline",
        )
        .expect("metric creation");
        registry
            .register(Box::new(incidents_created_total.clone()))
            .expect("metric registration");

        let incidents_failed_total = IntCounter::new(
            "flow_incidents_failed_total",
            "Downstream dispatch attempts that failed or timed out",
        )
        .expect("metric creation");
        registry
            .register(Box::new(incidents_failed_total.clone()))
            .expect("metric registration");

        let live_sessions = IntGauge::new(
            "flow_live_sessions",
            "Sessions currently held by the session store",
        )
        .expect("metric creation");
        registry
            .register(Box::new(live_sessions.clone()))
            .expect("metric registration");

        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "flow_request_duration_seconds",
                "End-to-end flow request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            requests_total,
            malformed_total,
            decrypt_failures_total,
            replays_total,
            transition_faults_total,
            incidents_created_total,
            incidents_failed_total,
            live_sessions,
            request_duration_seconds,
        }
    }

    /// Gathers the current metric families for encoding.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metrics.gather(), &mut buf) {
        tracing::error!("failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buf,
    )
        .into_response()
}
