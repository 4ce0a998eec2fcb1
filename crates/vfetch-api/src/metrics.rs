//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vfetch_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vfetch_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vfetch_http_requests_in_flight";

    // Event stream metrics
    pub const SSE_OBSERVERS_ACTIVE: &str = "vfetch_sse_observers_active";
    pub const SSE_EVENTS_SENT_TOTAL: &str = "vfetch_sse_events_sent_total";
    pub const SSE_KEEPALIVES_SENT_TOTAL: &str = "vfetch_sse_keepalives_sent_total";

    // Submission metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "vfetch_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "vfetch_jobs_rejected_total";
    pub const JOBS_REAPED_TOTAL: &str = "vfetch_jobs_reaped_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an accepted job submission.
pub fn record_job_submitted(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a rejected job submission.
pub fn record_job_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_REJECTED_TOTAL, &labels).increment(1);
}

/// Record jobs removed by the retention sweep.
pub fn record_jobs_reaped(count: usize) {
    counter!(names::JOBS_REAPED_TOTAL).increment(count as u64);
}

/// Record an event written to an event stream.
pub fn record_sse_event(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::SSE_EVENTS_SENT_TOTAL, &labels).increment(1);
}

/// Record a keep-alive comment written to an event stream.
pub fn record_sse_keepalive() {
    counter!(names::SSE_KEEPALIVES_SENT_TOTAL).increment(1);
}

/// Tracks one attached event stream observer for its lifetime.
pub struct ObserverGauge;

impl ObserverGauge {
    pub fn attach() -> Self {
        gauge!(names::SSE_OBSERVERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ObserverGauge {
    fn drop(&mut self) {
        gauge!(names::SSE_OBSERVERS_ACTIVE).decrement(1.0);
    }
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .expect("valid regex")
    })
}

fn job_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/jobs/[^/]+").expect("valid regex"))
}

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = uuid_re().replace_all(path, ":id");
    job_segment_re()
        .replace_all(&path, "/jobs/:job_id")
        .to_string()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/jobs/550e8400-e29b-41d4-a716-446655440000/events"),
            "/api/jobs/:job_id/events"
        );
        assert_eq!(sanitize_path("/api/jobs/anything"), "/api/jobs/:job_id");
        assert_eq!(sanitize_path("/api/formats"), "/api/formats");
    }
}
