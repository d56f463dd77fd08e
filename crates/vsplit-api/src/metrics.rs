//! Prometheus metrics for the intake server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vsplit_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vsplit_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vsplit_http_requests_in_flight";

    // Intake metrics
    pub const RUNS_LAUNCHED_TOTAL: &str = "vsplit_runs_launched_total";
    pub const HANDSHAKES_TOTAL: &str = "vsplit_handshakes_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", route_label(path).to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a background run started from a notification.
pub fn record_run_launched() {
    counter!(names::RUNS_LAUNCHED_TOTAL).increment(1);
}

/// Record a subscription handshake outcome.
pub fn record_handshake(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::HANDSHAKES_TOTAL, &labels).increment(1);
}

/// Bound label cardinality to the served routes.
fn route_label(path: &str) -> &'static str {
    match path {
        "/events" => "/events",
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "other",
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
