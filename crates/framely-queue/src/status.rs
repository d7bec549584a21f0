//! Redis-backed job status cache for polling and restart resume.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use framely_models::{JobId, JobState, VideoId};

use crate::error::QueueResult;

/// Cached job status, stored in Redis keyed by video ID.
///
/// This is the durable side of the job table: the API polls it, and a
/// restarted worker resumes from the last persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEntry {
    pub job_id: JobId,
    pub video_id: VideoId,
    pub state: JobState,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Current stage description
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last heartbeat from the worker driving this job
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Monotonically increasing event counter
    pub event_seq: u64,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatusEntry {
    pub fn new(job_id: JobId, video_id: VideoId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            video_id,
            state: JobState::Queued,
            progress: 0,
            message: "queued".to_string(),
            created_at: now,
            updated_at: now,
            last_heartbeat: None,
            event_seq: 0,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Update progress and stage message, bumping the event sequence.
    pub fn set_progress(&mut self, progress: u8, message: impl Into<String>) {
        self.progress = progress.min(100);
        self.message = message.into();
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }

    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
        self.event_seq += 1;
        if state.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
    }

    pub fn record_heartbeat(&mut self) {
        let now = Utc::now();
        self.last_heartbeat = Some(now);
        self.updated_at = now;
    }

    /// Whether the job looks abandoned by its worker.
    pub fn is_stale(&self, stale_threshold_secs: i64, grace_period_secs: i64) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        match self.last_heartbeat {
            Some(hb) => (now - hb).num_seconds() > stale_threshold_secs,
            None => (now - self.created_at).num_seconds() > grace_period_secs,
        }
    }
}

/// Client for the status cache.
pub struct StatusCache {
    client: redis::Client,
    prefix: String,
}

impl StatusCache {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: "framely:status".to_string(),
        })
    }

    fn key(&self, video_id: &VideoId) -> String {
        format!("{}:{}", self.prefix, video_id)
    }

    /// Persist a status entry.
    pub async fn put(&self, entry: &JobStatusEntry) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(entry)?;
        conn.set::<_, _, ()>(self.key(&entry.video_id), payload).await?;
        debug!(video_id = %entry.video_id, state = %entry.state, seq = entry.event_seq, "status persisted");
        Ok(())
    }

    /// Fetch the status entry for a video, if any.
    pub async fn get(&self, video_id: &VideoId) -> QueueResult<Option<JobStatusEntry>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(self.key(video_id)).await?;
        match payload {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    /// Remove the status entry (used when a failed job is restarted).
    pub async fn delete(&self, video_id: &VideoId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.key(video_id)).await?;
        Ok(())
    }

    /// Iterate every status entry, for the stale-job reaper.
    ///
    /// Uses cursor-based SCAN so a large table never blocks Redis;
    /// entries that fail to parse are skipped.
    pub async fn scan(&self) -> QueueResult<Vec<JobStatusEntry>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pattern = format!("{}:*", self.prefix);
        let mut entries = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            for key in keys {
                let payload: Option<String> = conn.get(&key).await?;
                if let Some(entry) =
                    payload.and_then(|json| serde_json::from_str::<JobStatusEntry>(&json).ok())
                {
                    entries.push(entry);
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> JobStatusEntry {
        JobStatusEntry::new(JobId::new(), VideoId::parse("t1").unwrap())
    }

    #[test]
    fn progress_updates_bump_event_seq() {
        let mut status = entry();
        assert_eq!(status.event_seq, 0);
        status.set_progress(10, "prep");
        status.set_progress(50, "detectors");
        assert_eq!(status.event_seq, 2);
        assert_eq!(status.progress, 50);
        assert_eq!(status.message, "detectors");
    }

    #[test]
    fn terminal_state_sets_finished_at() {
        let mut status = entry();
        status.set_state(JobState::Running);
        assert!(status.finished_at.is_none());
        status.set_state(JobState::Completed);
        assert!(status.finished_at.is_some());
        assert!(status.is_terminal());
    }

    #[test]
    fn stale_detection_uses_heartbeat_then_grace() {
        let mut status = entry();
        status.set_state(JobState::Running);
        assert!(!status.is_stale(60, 120));

        status.created_at = Utc::now() - chrono::Duration::seconds(300);
        assert!(status.is_stale(60, 120));

        status.record_heartbeat();
        assert!(!status.is_stale(60, 120));
    }
}
