//! `POST /ingest`: multipart upload of a source video.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use framely_models::VideoId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub video_id: String,
    pub bytes: u64,
}

/// Accept a multipart upload with `video_id` and `file` fields.
///
/// The file is buffered against the configured size cap and checked
/// against the MIME whitelist before anything touches the store, so an
/// oversize or mistyped upload leaves no trace on disk.
pub async fn ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let max_bytes = state.config.max_video_bytes();
    let mut video_id: Option<VideoId> = None;
    let mut file: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("bad video_id field: {e}")))?;
                video_id =
                    Some(VideoId::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))?);
            }
            Some("file") => {
                let content_type = field.content_type().unwrap_or("").to_string();
                if !state.config.mime_whitelist.iter().any(|m| m == &content_type) {
                    return Err(ApiError::UnsupportedMediaType(format!(
                        "{content_type:?} not in whitelist"
                    )));
                }

                let mut buffer: Vec<u8> = Vec::new();
                let mut field = field;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
                {
                    if (buffer.len() + chunk.len()) as u64 > max_bytes {
                        return Err(ApiError::PayloadTooLarge(format!(
                            "upload exceeds {} MB",
                            state.config.max_video_mb
                        )));
                    }
                    buffer.extend_from_slice(&chunk);
                }
                file = Some(buffer);
            }
            _ => {}
        }
    }

    let video_id = video_id.ok_or_else(|| ApiError::bad_request("missing video_id field"))?;
    let file = file.ok_or_else(|| ApiError::bad_request("missing file field"))?;
    if file.is_empty() {
        return Err(ApiError::bad_request("empty file"));
    }

    let bytes = file.len() as u64;
    state.store.save_upload(&video_id, &file).await?;
    metrics::counter!(crate::metrics::names::INGESTED_BYTES_TOTAL).increment(bytes);
    info!(video_id = %video_id, bytes, "source ingested");

    Ok((StatusCode::CREATED, Json(IngestResponse { video_id: video_id.to_string(), bytes })))
}
