//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::analyze::analyze;
use crate::handlers::health::health;
use crate::handlers::ingest::ingest;
use crate::handlers::result::result;
use crate::handlers::status::status;
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Multipart framing overhead on top of the video cap.
    let ingest_body_limit = state.config.max_video_bytes() as usize + 1024 * 1024;

    let api_routes = Router::new()
        .route("/analyze", post(analyze))
        .route(
            "/ingest",
            post(ingest).layer(DefaultBodyLimit::max(ingest_body_limit)),
        )
        .route("/status/:video_id", get(status))
        .route("/result/:video_id", get(result));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
