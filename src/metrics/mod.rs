use crate::error::{LimiterError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            LimiterError::Config(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "overload_guard_decisions_total",
            "Total number of admission decisions by method, limiter and verdict"
        );
        describe_counter!(
            "overload_guard_unknown_method_total",
            "Total number of calls to methods without a configured quota"
        );
        describe_counter!(
            "overload_guard_store_errors_total",
            "Total number of counter store failures during admission"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let metrics = service.render();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(metrics))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Record an admission decision
pub fn record_decision(method: &str, limiter: &str, allowed: bool) {
    let labels = [
        ("method", method.to_string()),
        ("limiter", limiter.to_string()),
        ("verdict", if allowed { "admit" } else { "reject" }.to_string()),
    ];

    counter!("overload_guard_decisions_total", &labels).increment(1);
}

/// Record a call to a method without quota
pub fn record_unknown_method(method: &str) {
    let labels = [("method", method.to_string())];

    counter!("overload_guard_unknown_method_total", &labels).increment(1);
}

/// Record a counter store failure
pub fn record_store_error(key: &str) {
    let labels = [("key", key.to_string())];

    counter!("overload_guard_store_errors_total", &labels).increment(1);
}
