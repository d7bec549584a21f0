//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Prep failed: {0}")]
    PrepFailed(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Job aborted")]
    Aborted,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] framely_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] framely_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] framely_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn prep_failed(msg: impl Into<String>) -> Self {
        Self::PrepFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Prep failures and missing sources fail the job outright; anything
    /// downstream degrades the bundle instead (handled in the scheduler).
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(
            self,
            WorkerError::PrepFailed(_)
                | WorkerError::SourceUnavailable(_)
                | WorkerError::Media(_)
                | WorkerError::Aborted
        )
    }
}
