//! Job executor: consumes analysis jobs from the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use framely_media::DetectorSet;
use framely_models::{AnalysisConfig, JobState};
use framely_queue::{JobQueue, QueueJob, StatusCache};
use framely_store::Store;
use framely_vl_client::VlClient;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pool::GpuPool;
use crate::processor::{process_analyze_job, ProcessingContext};
use crate::scheduler::Scheduler;

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
    ctx: Arc<ProcessingContext>,
}

impl JobExecutor {
    /// Wire up process-scoped services and create the executor.
    pub fn new(config: WorkerConfig, queue: JobQueue) -> WorkerResult<Self> {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let (shutdown, cancel_rx) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        let analysis_defaults = AnalysisConfig::from_env();
        let store = Store::from_env();
        let status = Arc::new(
            StatusCache::new(queue.redis_url()).map_err(WorkerError::Queue)?,
        );
        let vl = Arc::new(
            VlClient::from_env().map_err(|e| WorkerError::config_error(e.to_string()))?,
        );
        let pool = GpuPool::new(analysis_defaults.gpu_semaphore);
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(DetectorSet::builtin()),
            vl,
            pool,
            config.clone(),
            cancel_rx,
        ));

        let ctx = Arc::new(ProcessingContext {
            store,
            status,
            scheduler,
            analysis_defaults,
            worker_cfg: config.clone(),
        });

        Ok(Self {
            config,
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
            ctx,
        })
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically claim jobs orphaned by crashed workers.
        let queue_clone = Arc::clone(&self.queue);
        let consumer_name = self.consumer_name.clone();
        let ctx_clone = Arc::clone(&self.ctx);
        let semaphore_clone = Arc::clone(&self.job_semaphore);
        let claim_interval = self.config.claim_interval;
        let claim_min_idle = self.config.claim_min_idle;
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue_clone
                            .claim_pending(&consumer_name, claim_min_idle.as_millis() as u64, 5)
                            .await
                        {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let ctx = Arc::clone(&ctx_clone);
                                    let queue = Arc::clone(&queue_clone);
                                    let Ok(permit) =
                                        semaphore_clone.clone().acquire_owned().await
                                    else {
                                        break;
                                    };
                                    tokio::spawn(Self::run_with_permit(
                                        permit, ctx, queue, message_id, job,
                                    ));
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        });

        // Reap jobs whose worker stopped heartbeating: mark them failed
        // and release their dedup key so a re-analyze can start fresh.
        let stale_status = Arc::clone(&self.ctx.status);
        let stale_queue = Arc::clone(&self.queue);
        let stale_interval = self.config.stale_check_interval;
        let stale_heartbeat = self.config.stale_heartbeat_secs;
        let stale_grace = self.config.stale_grace_secs;
        let mut shutdown_rx_stale = self.shutdown.subscribe();

        let stale_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(stale_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_stale.changed() => {
                        if *shutdown_rx_stale.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let entries = match stale_status.scan().await {
                            Ok(entries) => entries,
                            Err(e) => {
                                warn!("Stale-job scan failed: {}", e);
                                continue;
                            }
                        };
                        for mut entry in entries {
                            if !entry.is_stale(stale_heartbeat, stale_grace) {
                                continue;
                            }
                            warn!(
                                video_id = %entry.video_id,
                                job_id = %entry.job_id,
                                "reclaiming stale job: worker heartbeat lost"
                            );
                            entry.set_state(JobState::Failed);
                            entry.message =
                                "processing stalled: worker heartbeat lost".to_string();
                            if let Err(e) = stale_status.put(&entry).await {
                                warn!("Failed to persist reclaimed job: {}", e);
                                continue;
                            }
                            if let Err(e) = stale_queue.clear_video_dedup(&entry.video_id).await {
                                warn!("Failed to release dedup for stale job: {}", e);
                            }
                            metrics::counter!("framely_jobs_reclaimed_total").increment(1);
                        }
                    }
                }
            }
        });

        // Main job consumption loop.
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        stale_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(
                &self.consumer_name,
                1000, // Block for 1 second
                available.min(5),
            )
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(Self::run_with_permit(permit, ctx, queue, message_id, job));
        }

        Ok(())
    }

    /// Hold the concurrency permit for the lifetime of one job execution.
    async fn run_with_permit(
        permit: OwnedSemaphorePermit,
        ctx: Arc<ProcessingContext>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: QueueJob,
    ) {
        let _permit = permit;
        Self::execute_job(ctx, queue, message_id, job).await;
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        ctx: Arc<ProcessingContext>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: QueueJob,
    ) {
        let QueueJob::AnalyzeVideo(analyze) = &job;
        let job_id = analyze.job_id.to_string();
        info!("Executing job {} (video {})", job_id, analyze.video_id);

        let result = Box::pin(process_analyze_job(&ctx, analyze)).await;

        match result {
            Ok(()) => {
                info!("Job {} completed successfully", job_id);
                if let Err(e) = Box::pin(queue.ack(&message_id)).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                // Clear dedup key so the same video can be re-analyzed later
                if let Err(e) = Box::pin(queue.clear_dedup(&job)).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);

                let retry_count = Box::pin(queue.increment_retry(&message_id)).await.unwrap_or(999);
                let max_retries = queue.max_retries();

                if retry_count >= max_retries || e.is_fatal_to_job() {
                    warn!(
                        "Job {} not retryable (attempt {}/{}), moving to DLQ",
                        job_id, retry_count, max_retries
                    );
                    let error_message = e.to_string();
                    if let Err(dlq_err) =
                        Box::pin(queue.dlq(&message_id, &job, &error_message)).await
                    {
                        error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                    }
                    if let Err(e) = Box::pin(queue.clear_dedup(&job)).await {
                        warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                    }
                } else {
                    info!(
                        "Job {} will be redelivered (attempt {}/{})",
                        job_id, retry_count, max_retries
                    );
                    // Redelivery happens via the claim scan after the
                    // visibility window lapses.
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs.max(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown; also cancels in-flight detector work.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
