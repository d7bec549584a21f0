//! `GET /result/{video_id}`: fetch the persisted bundle.

use axum::extract::{Path, State};
use axum::Json;

use framely_models::{JobState, Vab, VideoId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Return the full bundle JSON.
///
/// 409 while the job is still queued or running, 404 when nothing was
/// ever analyzed (or the job failed before producing a bundle).
pub async fn result(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<Vab>> {
    let video_id = VideoId::parse(video_id).map_err(|e| ApiError::bad_request(e.to_string()))?;

    if let Some(entry) = state.status.get(&video_id).await? {
        if matches!(entry.state, JobState::Queued | JobState::Running) {
            return Err(ApiError::conflict(format!(
                "analysis for {video_id} still {}",
                entry.state
            )));
        }
    }

    match state.store.load_bundle(&video_id).await? {
        Some(bundle) => Ok(Json(bundle)),
        None => Err(ApiError::not_found(format!("no bundle for {video_id}"))),
    }
}
