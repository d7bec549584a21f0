//! `POST /analyze`: create or re-join an analysis job.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use framely_models::{AblationFlags, JobSource, VideoId};
use framely_queue::AnalyzeVideoJob;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1, max = 128))]
    pub video_id: String,
    #[validate(url)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub ablations: Option<AblationFlags>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub job_id: String,
    pub video_id: String,
    pub status: String,
    pub message: String,
}

/// Submit a video for analysis.
///
/// Idempotent on `video_id`: a completed job returns its existing bundle
/// handle, a running job returns its existing job id, a failed job is
/// restarted.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<(StatusCode, Json<AnalyzeResponse>)> {
    request.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    let video_id =
        VideoId::parse(&request.video_id).map_err(|e| ApiError::bad_request(e.to_string()))?;

    // Idempotency short-circuit from the durable status table.
    if let Some(existing) = state.status.get(&video_id).await? {
        match existing.state {
            framely_models::JobState::Completed => {
                return Ok((
                    StatusCode::OK,
                    Json(AnalyzeResponse {
                        job_id: existing.job_id.to_string(),
                        video_id: video_id.to_string(),
                        status: existing.state.to_string(),
                        message: "bundle available via /result".to_string(),
                    }),
                ));
            }
            framely_models::JobState::Queued | framely_models::JobState::Running => {
                return Ok((
                    StatusCode::OK,
                    Json(AnalyzeResponse {
                        job_id: existing.job_id.to_string(),
                        video_id: video_id.to_string(),
                        status: existing.state.to_string(),
                        message: "analysis already in progress".to_string(),
                    }),
                ));
            }
            framely_models::JobState::Failed => {
                // A failed job may be restarted with a fresh job id.
                state.status.delete(&video_id).await?;
            }
        }
    }

    let source = resolve_source(&state, &video_id, request.media_url.as_deref()).await?;
    let job = AnalyzeVideoJob::new(video_id.clone(), source)
        .with_ablations(request.ablations.unwrap_or_default());
    let job_id = job.job_id;

    // Seed the status table before the job becomes visible to workers.
    let entry = framely_queue::JobStatusEntry::new(job_id, video_id.clone());
    state.status.put(&entry).await?;

    match state.queue.enqueue_analyze(job).await {
        Ok(message_id) => {
            metrics::counter!(crate::metrics::names::JOBS_ENQUEUED_TOTAL).increment(1);
            info!(video_id = %video_id, %job_id, message_id, "analysis enqueued");
            Ok((
                StatusCode::OK,
                Json(AnalyzeResponse {
                    job_id: job_id.to_string(),
                    video_id: video_id.to_string(),
                    status: "queued".to_string(),
                    message: "analysis queued".to_string(),
                }),
            ))
        }
        Err(e) if e.is_duplicate() => {
            // Lost an enqueue race: another submission owns this video.
            state.status.delete(&video_id).await.ok();
            Err(ApiError::conflict(format!("analysis for {video_id} already in flight")))
        }
        Err(e) => {
            state.status.delete(&video_id).await.ok();
            Err(e.into())
        }
    }
}

async fn resolve_source(
    state: &AppState,
    video_id: &VideoId,
    media_url: Option<&str>,
) -> ApiResult<JobSource> {
    if let Some(url) = media_url {
        return Ok(JobSource::Url { media_url: url.to_string() });
    }
    match state.store.find_source(video_id).await? {
        Some(path) => Ok(JobSource::Uploaded { path }),
        None => Err(ApiError::bad_request(format!(
            "no media_url given and no ingested file for {video_id}"
        ))),
    }
}
