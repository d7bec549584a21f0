//! `GET /status/{video_id}`: job progress polling.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use framely_models::VideoId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub video_id: String,
    pub state: String,
    pub progress: u8,
    pub message: String,
    pub vab_available: bool,
}

/// Report the current job state for a video.
///
/// Reads the status cache first; a persisted bundle without a cache entry
/// (e.g. after a cache flush) still reports as completed.
pub async fn status(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let video_id = VideoId::parse(video_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let vab_available = state.store.bundle_exists(&video_id).await;

    if let Some(entry) = state.status.get(&video_id).await? {
        return Ok(Json(StatusResponse {
            job_id: entry.job_id.to_string(),
            video_id: video_id.to_string(),
            state: entry.state.to_string(),
            progress: entry.progress,
            message: entry.message,
            vab_available,
        }));
    }

    if vab_available {
        return Ok(Json(StatusResponse {
            job_id: String::new(),
            video_id: video_id.to_string(),
            state: framely_models::JobState::Completed.to_string(),
            progress: 100,
            message: "bundle available".to_string(),
            vab_available: true,
        }));
    }

    Err(ApiError::not_found(format!("no job for {video_id}")))
}
