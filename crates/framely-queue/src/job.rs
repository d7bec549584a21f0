//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use framely_models::{AblationFlags, JobId, JobSource, VideoId};

/// Job to analyze a video and produce its bundle.
///
/// This is the only unit of work on the stream: prep, the detector DAG,
/// merge and the coverage gate all run inside one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Video ID keying the job and the store directory
    pub video_id: VideoId,
    /// Where the source video comes from
    pub source: JobSource,
    /// Per-job ablation flags
    #[serde(default)]
    pub ablations: AblationFlags,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl AnalyzeVideoJob {
    /// Create a new analyze job.
    pub fn new(video_id: VideoId, source: JobSource) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            source,
            ablations: AblationFlags::default(),
            created_at: Utc::now(),
        }
    }

    /// Set ablation flags.
    pub fn with_ablations(mut self, ablations: AblationFlags) -> Self {
        self.ablations = ablations;
        self
    }

    /// Generate idempotency key for deduplication.
    ///
    /// Keyed by video ID alone: one analysis may be in flight per video,
    /// which is what makes `analyze` idempotent at the API boundary.
    pub fn idempotency_key(&self) -> String {
        Self::idempotency_key_for(&self.video_id)
    }

    /// The key a job for this video would dedup under, without the job.
    /// Used when a reaper releases a stuck video it has no job object for.
    pub fn idempotency_key_for(video_id: &VideoId) -> String {
        format!("analyze:{video_id}")
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Full analysis: prep, detector DAG, merge, coverage gate
    AnalyzeVideo(AnalyzeVideoJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::AnalyzeVideo(j) => &j.job_id,
        }
    }

    pub fn video_id(&self) -> &VideoId {
        match self {
            QueueJob::AnalyzeVideo(j) => &j.video_id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::AnalyzeVideo(j) => j.idempotency_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_job_serde_roundtrip() {
        let job = AnalyzeVideoJob::new(
            VideoId::parse("t1").unwrap(),
            JobSource::Url { media_url: "https://example.com/v.mp4".into() },
        );

        let wrapper = QueueJob::AnalyzeVideo(job.clone());
        let json = serde_json::to_string(&wrapper).expect("serialize QueueJob");
        let decoded: QueueJob = serde_json::from_str(&json).expect("deserialize QueueJob");

        match decoded {
            QueueJob::AnalyzeVideo(j) => {
                assert_eq!(j.job_id, job.job_id);
                assert_eq!(j.video_id, job.video_id);
                assert_eq!(j.created_at, job.created_at);
            }
        }
    }

    #[test]
    fn idempotency_key_is_per_video() {
        let a = AnalyzeVideoJob::new(
            VideoId::parse("t1").unwrap(),
            JobSource::Url { media_url: "https://example.com/a.mp4".into() },
        );
        let b = AnalyzeVideoJob::new(
            VideoId::parse("t1").unwrap(),
            JobSource::Url { media_url: "https://example.com/b.mp4".into() },
        );
        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }
}
