//! Analysis job model and identifiers.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::AblationFlags;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced when validating a caller-supplied video ID.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoIdError {
    #[error("video_id must not be empty")]
    Empty,
    #[error("video_id exceeds {0} characters")]
    TooLong(usize),
    #[error("video_id contains invalid character {0:?}")]
    InvalidChar(char),
}

const MAX_VIDEO_ID_LEN: usize = 128;

/// Caller-supplied video identifier.
///
/// The video ID keys the job table and names the per-video store directory,
/// so it is restricted to a filesystem-safe character set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    /// Validate and wrap a raw video ID.
    pub fn parse(raw: impl Into<String>) -> Result<Self, VideoIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(VideoIdError::Empty);
        }
        if raw.len() > MAX_VIDEO_ID_LEN {
            return Err(VideoIdError::TooLong(MAX_VIDEO_ID_LEN));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(VideoIdError::InvalidChar(c));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the source video comes from.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSource {
    /// Remote media URL fetched by the worker.
    Url { media_url: String },
    /// File previously placed in the store via `ingest`.
    Uploaded { path: PathBuf },
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is queued waiting for a worker.
    #[default]
    Queued,
    /// Job is actively being processed.
    Running,
    /// Job completed and the bundle was persisted.
    Completed,
    /// Job failed before a bundle could be produced.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A video analysis job.
///
/// Created by `analyze`, mutated only by the scheduler, terminal once
/// `completed` or `failed`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoJob {
    /// Unique job ID.
    pub job_id: JobId,
    /// Caller-supplied video ID keying the job and the store directory.
    pub video_id: VideoId,
    /// Source of the video.
    pub source: JobSource,
    /// Per-job ablation flags.
    #[serde(default)]
    pub ablations: AblationFlags,
    /// Current lifecycle state.
    pub status: JobState,
    /// Progress percentage (0-100).
    pub progress: u8,
    /// Human-readable status message.
    pub message: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl VideoJob {
    /// Create a new queued job.
    pub fn new(video_id: VideoId, source: JobSource) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            source,
            ablations: AblationFlags::default(),
            status: JobState::Queued,
            progress: 0,
            message: "queued".to_string(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Set ablation flags.
    pub fn with_ablations(mut self, ablations: AblationFlags) -> Self {
        self.ablations = ablations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_id_accepts_filesystem_safe_ids() {
        assert!(VideoId::parse("t1").is_ok());
        assert!(VideoId::parse("video-2026_01.take3").is_ok());
    }

    #[test]
    fn video_id_rejects_traversal_and_empty() {
        assert_eq!(VideoId::parse(""), Err(VideoIdError::Empty));
        assert_eq!(VideoId::parse("a/b"), Err(VideoIdError::InvalidChar('/')));
        assert!(VideoId::parse("x".repeat(200)).is_err());
    }

    #[test]
    fn job_state_terminality() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }
}
