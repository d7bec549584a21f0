//! Per-job pipeline: source resolution, prep, DAG, merge, persist.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use framely_media::{fetch, prepare};
use framely_models::{AnalysisConfig, JobState};
use framely_queue::{AnalyzeVideoJob, JobStatusEntry, StatusCache};
use framely_store::Store;

use crate::config::WorkerConfig;
use crate::coverage::compute_coverage;
use crate::error::{WorkerError, WorkerResult};
use crate::merge::{assemble, MergeInputs};
use crate::scheduler::{ProgressSink, Scheduler};

/// Process-scoped services handed to the processor at construction.
///
/// No ambient globals: the store, the status cache and the scheduler's
/// pool all live here and are torn down with the executor.
pub struct ProcessingContext {
    pub store: Store,
    pub status: Arc<StatusCache>,
    pub scheduler: Arc<Scheduler>,
    pub analysis_defaults: AnalysisConfig,
    pub worker_cfg: WorkerConfig,
}

/// Progress sink that persists into the Redis status cache.
struct StatusProgress {
    cache: Arc<StatusCache>,
    entry: Mutex<JobStatusEntry>,
}

impl StatusProgress {
    fn new(cache: Arc<StatusCache>, entry: JobStatusEntry) -> Self {
        Self { cache, entry: Mutex::new(entry) }
    }

    async fn set_state(&self, state: JobState, message: &str) {
        let mut entry = self.entry.lock().await;
        entry.set_state(state);
        entry.message = message.to_string();
        if let Err(e) = self.cache.put(&entry).await {
            warn!(video_id = %entry.video_id, "failed to persist job state: {e}");
        }
    }

    async fn heartbeat(&self) {
        let mut entry = self.entry.lock().await;
        entry.record_heartbeat();
        let _ = self.cache.put(&entry).await;
    }
}

#[async_trait]
impl ProgressSink for StatusProgress {
    async fn update(&self, progress: u8, message: &str) {
        let mut entry = self.entry.lock().await;
        entry.set_progress(progress, message);
        if let Err(e) = self.cache.put(&entry).await {
            warn!(video_id = %entry.video_id, "failed to persist progress: {e}");
        }
    }
}

/// Run one analyze job end to end.
///
/// Prep failures (or a missing source) fail the job; anything after prep
/// degrades the bundle inside the scheduler and still persists it.
pub async fn process_analyze_job(
    ctx: &ProcessingContext,
    job: &AnalyzeVideoJob,
) -> WorkerResult<()> {
    let video_id = &job.video_id;
    let started = Instant::now();

    let entry = match ctx.status.get(video_id).await? {
        Some(existing) if existing.job_id == job.job_id => existing,
        _ => JobStatusEntry::new(job.job_id, video_id.clone()),
    };
    let progress = Arc::new(StatusProgress::new(Arc::clone(&ctx.status), entry));
    progress.set_state(JobState::Running, "starting").await;

    // Periodic heartbeat so a stale-job scan never reclaims live work.
    // Shares the live entry with the progress sink, so a heartbeat never
    // clobbers a newer progress update.
    let hb_progress = Arc::clone(&progress);
    let hb_interval = ctx.worker_cfg.heartbeat_interval;
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(hb_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            hb_progress.heartbeat().await;
        }
    });

    let result = run_pipeline(ctx, job, &progress, started).await;
    heartbeat.abort();

    match &result {
        Ok(()) => {
            progress.update(100, "completed").await;
            progress.set_state(JobState::Completed, "bundle available").await;
            info!(video_id = %video_id, elapsed_ms = started.elapsed().as_millis() as u64, "job completed");
        }
        Err(e) => {
            error!(video_id = %video_id, error = %e, "job failed");
            progress.set_state(JobState::Failed, &e.to_string()).await;
        }
    }
    result
}

async fn run_pipeline(
    ctx: &ProcessingContext,
    job: &AnalyzeVideoJob,
    progress: &StatusProgress,
    _started: Instant,
) -> WorkerResult<()> {
    let video_id = &job.video_id;
    let mut latency_ms: BTreeMap<String, u64> = BTreeMap::new();

    // Resolve the source: an ingested file wins, then the media URL.
    progress.update(2, "resolving source").await;
    let fetch_started = Instant::now();
    let video_path = match ctx.store.find_source(video_id).await? {
        Some(path) => path,
        None => match &job.source {
            framely_models::JobSource::Url { media_url } => {
                ctx.store.ensure_video_dir(video_id).await?;
                let dest = ctx.store.video_path(video_id);
                fetch::download(media_url, &dest)
                    .await
                    .map_err(|e| WorkerError::SourceUnavailable(e.to_string()))?;
                dest
            }
            framely_models::JobSource::Uploaded { path } => {
                return Err(WorkerError::SourceUnavailable(format!(
                    "uploaded source missing from store: {}",
                    path.display()
                )));
            }
        },
    };
    latency_ms.insert("fetch".into(), fetch_started.elapsed().as_millis() as u64);

    progress.update(6, "fingerprinting source").await;
    let sha256 = Store::sha256_file(&video_path).await?;

    // Prep: every frame decoded to disk before any detector runs.
    progress.update(10, "prep: shots and frames").await;
    let prep_started = Instant::now();
    let cfg = ctx.analysis_defaults.clone().with_ablations(job.ablations);
    let work_dir = ctx.store.video_dir(video_id);
    let prep = prepare(&video_path, &work_dir, cfg.frame_stride)
        .await
        .map_err(|e| WorkerError::prep_failed(e.to_string()))?;
    latency_ms.insert("prep".into(), prep_started.elapsed().as_millis() as u64);

    // The detector DAG.
    let run = Box::pin(ctx.scheduler.run_job(video_id, &prep, cfg, &work_dir, progress)).await?;
    latency_ms.insert("detect".into(), run.detect_elapsed_ms);

    // Merge, gate, persist.
    progress.update(88, "merging bundle").await;
    let merge_started = Instant::now();
    let coverage = compute_coverage(&run, &prep.info);
    let bundle = assemble(
        MergeInputs {
            video_id,
            video_path: video_path.to_string_lossy().into_owned(),
            sha256,
            info: &prep.info,
            run: &run,
            internal_error_budget: ctx.worker_cfg.internal_error_budget,
            latency_ms: {
                let mut map = latency_ms.clone();
                map.insert("merge".into(), merge_started.elapsed().as_millis() as u64);
                map
            },
            gpu_mem_mb_peak: run.gpu_high_water as u64 * ctx.worker_cfg.gpu_mem_mb_per_permit,
        },
        coverage,
    );

    progress.update(95, "persisting bundle").await;
    ctx.store.write_bundle(video_id, &bundle).await?;

    metrics::counter!("framely_jobs_completed_total").increment(1);
    Ok(())
}
