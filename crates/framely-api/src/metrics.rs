//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "framely_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "framely_http_request_duration_seconds";
    pub const JOBS_ENQUEUED_TOTAL: &str = "framely_jobs_enqueued_total";
    pub const INGESTED_BYTES_TOTAL: &str = "framely_ingested_bytes_total";
}

/// HTTP request accounting middleware.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = sanitize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

/// Collapse per-video path segments so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        out.push(segment.to_string());
        if matches!(segment, "status" | "result") {
            if segments.next().is_some() {
                out.push(":video_id".to_string());
            }
            break;
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_video_ids() {
        assert_eq!(sanitize_path("/status/t1"), "/status/:video_id");
        assert_eq!(sanitize_path("/result/some-long-id"), "/result/:video_id");
        assert_eq!(sanitize_path("/health"), "/health");
        assert_eq!(sanitize_path("/analyze"), "/analyze");
    }
}
