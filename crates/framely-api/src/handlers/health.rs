//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health response. Never depends on a specific job.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub gpu_available: bool,
    pub queue_connected: bool,
    pub vl_available: bool,
}

/// Health check endpoint.
///
/// Probes the queue's Redis and the VL endpoint's model listing;
/// `gpu_available` reflects the configured pool capacity.
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let queue_connected = state.queue.ping().await.is_ok();
    let vl_available = state.vl.health().await;
    let gpu_available = state.analysis.gpu_semaphore > 0;

    let healthy = queue_connected;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gpu_available,
        queue_connected,
        vl_available,
    };

    if healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
