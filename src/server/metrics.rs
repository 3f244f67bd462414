//! Prometheus metrics for the conversion service.

use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;
use tracing::error;

/// Metric name prefix for all service metrics.
const PREFIX: &str = "convert_server";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    pub static ref CONVERSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_conversions_total"), "Conversions by source and result"),
        &["source", "result"]
    ).expect("Failed to create conversions_total metric");

    pub static ref RATE_LIMIT_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_rate_limit_hits_total"), "Rate limit violations"),
        &["path"]
    ).expect("Failed to create rate_limit_hits_total metric");

    pub static ref ACTIVE_JOBS: IntGauge = IntGauge::new(
        format!("{PREFIX}_active_jobs"),
        "Jobs currently in a non-terminal state"
    ).expect("Failed to create active_jobs metric");

    pub static ref WEBSOCKET_CONNECTIONS: IntGauge = IntGauge::new(
        format!("{PREFIX}_websocket_connections"),
        "Open WebSocket connections"
    ).expect("Failed to create websocket_connections metric");

    pub static ref CACHE_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_cache_size_bytes"),
        "Bytes currently held by the conversion cache"
    ).expect("Failed to create cache_size_bytes metric");
}

/// Register all metrics with the global registry. Call once at startup.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(RATE_LIMIT_HITS_TOTAL.clone()),
        Box::new(ACTIVE_JOBS.clone()),
        Box::new(WEBSOCKET_CONNECTIONS.clone()),
        Box::new(CACHE_SIZE_BYTES.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            // Double registration happens in test binaries; harmless.
            tracing::debug!("Metric registration skipped: {}", e);
        }
    }
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_conversion(source: &str, success: bool) {
    let result = if success { "ok" } else { "error" };
    CONVERSIONS_TOTAL.with_label_values(&[source, result]).inc();
}

/// A job left CREATED for RUNNING.
pub fn record_job_started() {
    ACTIVE_JOBS.inc();
}

/// A job reached a terminal state. Terminal transitions emit exactly
/// one terminal event, so calls balance `record_job_started`.
pub fn record_job_finished() {
    ACTIVE_JOBS.dec();
}

/// Handler for `GET /metrics` on the metrics port.
pub async fn metrics_handler() -> impl IntoResponse {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (
        StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_requests_does_not_panic() {
        init_metrics();
        record_http_request("POST", "/api/convert/to-base64", 200, Duration::from_millis(5));
        record_conversion("single", true);
        record_conversion("batch", false);
    }

    #[test]
    fn job_gauge_accepts_paired_updates() {
        // Other test threads move the gauge concurrently, so only the
        // operations themselves are exercised here; balance is covered
        // by the terminal-event exactly-once tests in the batch module.
        init_metrics();
        record_job_started();
        record_job_finished();
    }
}
