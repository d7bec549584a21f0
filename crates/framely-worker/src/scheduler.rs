//! The per-job DAG scheduler.
//!
//! For each shot: Phase A (the sequential GPU chain) and Phase B (the
//! parallel CPU fan-out) run concurrently, then Phase C (VL reasoning)
//! strictly after both. Shots themselves are pipelined up to the
//! configured parallelism, all under one GPU pool, with the job-scoped
//! fallback ladder deciding what survives a transient-resource fault.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use framely_media::{provenance_for, sr_frame_paths, Detector, DetectorCtx, DetectorSet, PrepOutput};
use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, DetectorRecord, Provenance,
    ReasoningPayload, Shot, VideoId,
};
use framely_vl_client::{ShotReasoningRequest, VlClient, VlError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::ladder::{FallbackLadder, FiredStep, LadderAction};
use crate::pool::GpuPool;

/// Reason strings for records skipped by the scheduler itself.
pub const REASON_NO_ADJACENT_SHOT: &str = "no_adjacent_shot";
pub const REASON_SR_ABLATED: &str = "sr_disabled_by_ablation";
pub const REASON_SR_NOT_APPLIED: &str = "sr_not_applied";
pub const REASON_RESOURCE_EXHAUSTED: &str = "resource_exhausted";
pub const REASON_INTERNAL: &str = "internal_error";
pub const REASON_VL_UNREACHABLE: &str = "vl_unreachable";
pub const REASON_PARSE_FAILED: &str = "parse_failed";
pub const REASON_STOI_DISABLED: &str = "stoi_disabled";

/// Progress reporting seam between the scheduler and the job store.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, progress: u8, message: &str);
}

/// Sink for contexts that do not track progress (tests, CLI one-shots).
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn update(&self, _progress: u8, _message: &str) {}
}

/// Everything one shot produced.
#[derive(Debug, Clone)]
pub struct ShotOutcome {
    pub shot: Shot,
    /// Records in execution order: Phase A chain, Phase B fan-out, reasoning.
    pub records: Vec<DetectorRecord>,
    pub sr_used: bool,
}

impl ShotOutcome {
    pub fn record(&self, kind: DetectorKind) -> Option<&DetectorRecord> {
        self.records.iter().find(|r| r.kind == kind)
    }
}

/// Result of driving the DAG for one job.
#[derive(Debug)]
pub struct JobRun {
    pub shot_outcomes: Vec<ShotOutcome>,
    pub fired_steps: Vec<FiredStep>,
    pub oom_trips: u32,
    pub retries: u32,
    /// Shots that recorded at least one internal detector error.
    pub internal_shots: usize,
    pub gpu_high_water: usize,
    /// Config as mutated by the ladder (tiling scale, VL context).
    pub effective_cfg: AnalysisConfig,
    pub detect_elapsed_ms: u64,
}

/// Job-scoped mutable state shared by concurrently running shots.
struct JobState {
    ladder: FallbackLadder,
    cfg: AnalysisConfig,
    /// (shot, detector kind) pairs that already blew a deadline once.
    deadline_struck: HashSet<(u32, DetectorKind)>,
    oom_trips: u32,
    retries: u32,
}

/// The DAG scheduler. Holds only process-scoped services; all per-job
/// state lives in [`JobState`] for the duration of one `run_job` call.
pub struct Scheduler {
    detectors: Arc<DetectorSet>,
    vl: Arc<VlClient>,
    pool: GpuPool,
    worker_cfg: WorkerConfig,
    cancel: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        detectors: Arc<DetectorSet>,
        vl: Arc<VlClient>,
        pool: GpuPool,
        worker_cfg: WorkerConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { detectors, vl, pool, worker_cfg, cancel }
    }

    pub fn pool(&self) -> &GpuPool {
        &self.pool
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Run the detector DAG over all prepared shots.
    pub async fn run_job(
        self: &Arc<Self>,
        video_id: &VideoId,
        prep: &PrepOutput,
        cfg: AnalysisConfig,
        work_dir: &Path,
        progress: &dyn ProgressSink,
    ) -> WorkerResult<JobRun> {
        let started = Instant::now();
        let total_shots = prep.shots.len();
        let state = Arc::new(Mutex::new(JobState {
            ladder: FallbackLadder::new(cfg.oom_fallback_order.clone()),
            cfg,
            deadline_struck: HashSet::new(),
            oom_trips: 0,
            retries: 0,
        }));

        info!(video_id = %video_id, shots = total_shots, "starting detector DAG");

        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut outcomes: Vec<ShotOutcome> = Vec::with_capacity(total_shots);

        // `buffered` keeps shot order while letting up to
        // `max_shot_parallel` chains interleave on the pool.
        let mut shot_stream = stream::iter(prep.shots.iter().enumerate().map(|(i, shot)| {
            let prev = if i > 0 { Some(prep.shots[i - 1].clone()) } else { None };
            let shot = shot.clone();
            let state = Arc::clone(&state);
            let audio_path = prep.audio_path.clone();
            let work_dir = work_dir.to_path_buf();
            let video_id = video_id.clone();
            let done = Arc::clone(&done);
            let scheduler = Arc::clone(self);
            async move {
                let outcome = scheduler
                    .run_shot(video_id, shot, prev, audio_path, work_dir, &state)
                    .await?;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                let pct = (15 + 70 * finished / total_shots.max(1)) as u8;
                Ok::<(ShotOutcome, u8, usize), WorkerError>((outcome, pct, finished))
            }
        }))
        .buffered(self.worker_cfg.max_shot_parallel.max(1));

        while let Some(result) = shot_stream.next().await {
            let (outcome, pct, finished) = result?;
            progress
                .update(pct, &format!("analyzed shot {finished}/{total_shots}"))
                .await;
            outcomes.push(outcome);
        }
        drop(shot_stream);

        let state = Arc::try_unwrap(state)
            .map_err(|_| WorkerError::job_failed("job state still shared after DAG"))?
            .into_inner()
            .map_err(|_| WorkerError::job_failed("job state poisoned"))?;

        let internal_shots = outcomes
            .iter()
            .filter(|o| {
                o.records.iter().any(|r| {
                    r.provenance.skipped_reason.as_deref() == Some(REASON_INTERNAL)
                })
            })
            .count();

        Ok(JobRun {
            shot_outcomes: outcomes,
            fired_steps: state.ladder.fired().to_vec(),
            oom_trips: state.oom_trips,
            retries: state.retries,
            internal_shots,
            gpu_high_water: self.pool.high_water(),
            effective_cfg: state.cfg,
            detect_elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Run Phases A, B and C for one shot.
    async fn run_shot(
        &self,
        video_id: VideoId,
        shot: Shot,
        prev_shot: Option<Shot>,
        audio_path: Option<PathBuf>,
        work_dir: PathBuf,
        state: &Arc<Mutex<JobState>>,
    ) -> WorkerResult<ShotOutcome> {
        if self.cancelled() {
            return Err(WorkerError::Aborted);
        }
        let shot_id = shot.shot_id;
        debug!(shot_id, frames = shot.frame_paths.len(), "shot scheduled");

        // One ladder advance per shot: a second transient fault in the
        // same shot is surfaced as skipped instead of burning another step.
        let advanced_this_shot = Arc::new(AtomicBool::new(false));

        let mut base_ctx = DetectorCtx::new(video_id, shot.clone(), work_dir);
        base_ctx.prev_shot = prev_shot;
        base_ctx.audio_path = audio_path;

        let a_fut = self.run_phase_a(base_ctx.clone(), state, &advanced_this_shot);
        let b_fut = self.run_phase_b(base_ctx.clone(), state, &advanced_this_shot);
        let ((mut records, sr_used, objects_for_c), b_records) = tokio::join!(a_fut, b_fut);
        records.extend(b_records);

        if self.cancelled() {
            return Err(WorkerError::Aborted);
        }

        // Phase C strictly follows A and B of this shot.
        let mut ctx = base_ctx;
        ctx.prior_objects = objects_for_c;
        let reasoning = self.run_phase_c(&ctx, &records, state, &advanced_this_shot).await;
        records.push(reasoning);

        Ok(ShotOutcome { shot, records, sr_used })
    }

    /// Phase A: the strictly ordered GPU chain.
    ///
    /// Returns the chain's records, whether super-resolution was applied,
    /// and the final surviving object set for downstream phases.
    async fn run_phase_a(
        &self,
        mut ctx: DetectorCtx,
        state: &Arc<Mutex<JobState>>,
        advanced: &Arc<AtomicBool>,
    ) -> (Vec<DetectorRecord>, bool, Option<framely_models::ObjectsPayload>) {
        let mut records = Vec::with_capacity(5);
        let mut sr_used = false;

        for kind in DetectorKind::PHASE_A {
            let Some(det) = self.detectors.get(kind) else {
                continue;
            };
            let cfg = snapshot_cfg(state);

            // Ablations and fired ladder steps disable parts of the chain
            // before any work is admitted.
            let skip_reason: Option<String> = {
                let guard = state.lock().expect("job state lock");
                match kind {
                    DetectorKind::SuperResolution if guard.cfg.ablations.no_sr => {
                        Some(REASON_SR_ABLATED.to_string())
                    }
                    DetectorKind::ObjectsFine if guard.cfg.ablations.no_sr => {
                        Some(REASON_SR_ABLATED.to_string())
                    }
                    DetectorKind::ObjectsFine if !sr_used => {
                        guard
                            .ladder
                            .disabled_reason(kind)
                            .map(String::from)
                            .or(Some(REASON_SR_NOT_APPLIED.to_string()))
                    }
                    _ => guard.ladder.disabled_reason(kind).map(String::from),
                }
            };
            if let Some(reason) = skip_reason {
                records.push(DetectorRecord::skipped(
                    kind,
                    provenance_for(det.as_ref(), &cfg),
                    reason,
                ));
                continue;
            }

            let record = self.invoke(&det, &ctx, state, advanced).await;

            match &record.payload {
                DetectorPayload::Objects(payload) => {
                    ctx.prior_objects = Some(payload.clone());
                }
                DetectorPayload::Sr(payload) if payload.applied => {
                    sr_used = true;
                    ctx.sr_frames = sr_frame_paths(&ctx.work_dir, &ctx.shot);
                }
                _ => {}
            }
            records.push(record);
        }

        let objects = ctx.prior_objects.clone();
        (records, sr_used, objects)
    }

    /// Phase B: parallel fan-out of the independent detectors.
    ///
    /// Individual failures leave their slot skipped but never abort the
    /// phase; completion is the completion of the slowest member.
    async fn run_phase_b(
        &self,
        ctx: DetectorCtx,
        state: &Arc<Mutex<JobState>>,
        advanced: &Arc<AtomicBool>,
    ) -> Vec<DetectorRecord> {
        let futures = DetectorKind::PHASE_B.iter().filter_map(|kind| {
            let det = self.detectors.get(*kind)?;
            let ctx = ctx.clone();
            let kind = *kind;
            Some(async move {
                if kind == DetectorKind::Transition && ctx.prev_shot.is_none() {
                    let cfg = snapshot_cfg(state);
                    return DetectorRecord::skipped(
                        kind,
                        provenance_for(det.as_ref(), &cfg),
                        REASON_NO_ADJACENT_SHOT,
                    );
                }
                self.invoke(&det, &ctx, state, advanced).await
            })
        });

        futures_util::future::join_all(futures).await
    }

    /// Phase C: VL reasoning over sampled frames and detector summaries.
    ///
    /// The call is io-class: it never holds a pool permit. Transport
    /// failures were already retried with backoff inside the client; a
    /// deadline expiry is a transient fault eligible for the
    /// context-shrinking ladder step.
    async fn run_phase_c(
        &self,
        ctx: &DetectorCtx,
        records: &[DetectorRecord],
        state: &Arc<Mutex<JobState>>,
        advanced: &Arc<AtomicBool>,
    ) -> DetectorRecord {
        let shot_id = ctx.shot.shot_id;
        let cfg = snapshot_cfg(state);
        let provenance = self.reasoning_provenance(&cfg);

        if self.cancelled() {
            return DetectorRecord::skipped(DetectorKind::Reasoning, provenance, "aborted");
        }

        let request = ShotReasoningRequest {
            shot_id,
            frame_refs: ctx
                .shot
                .sample_frames(cfg.qwen_context_max_frames as usize)
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            detector_summary: summarize_records(records),
        };

        match timeout(self.worker_cfg.vl_deadline, self.vl.reason_shot(&request)).await {
            Ok(Ok(payload)) => self.reasoning_record(payload, provenance),
            Ok(Err(VlError::ParseFailed(err))) => {
                warn!(shot_id, error = %err, "VL reply unparseable after strict retry");
                DetectorRecord::skipped(DetectorKind::Reasoning, provenance, REASON_PARSE_FAILED)
            }
            Ok(Err(err)) => {
                warn!(shot_id, error = %err, "VL endpoint unreachable");
                DetectorRecord::skipped(DetectorKind::Reasoning, provenance, REASON_VL_UNREACHABLE)
            }
            Err(_elapsed) => {
                self.reasoning_deadline_fallback(ctx, records, state, advanced, provenance).await
            }
        }
    }

    /// Deadline expiry on the VL call: advance the ladder (shrinking the
    /// frame context) and retry once.
    async fn reasoning_deadline_fallback(
        &self,
        ctx: &DetectorCtx,
        records: &[DetectorRecord],
        state: &Arc<Mutex<JobState>>,
        advanced: &Arc<AtomicBool>,
        provenance: Provenance,
    ) -> DetectorRecord {
        let shot_id = ctx.shot.shot_id;
        metrics::counter!("framely_oom_trips_total").increment(1);

        let action = {
            let mut guard = state.lock().expect("job state lock");
            guard.oom_trips += 1;
            if advanced.swap(true, Ordering::SeqCst) {
                LadderAction::SkipExhausted
            } else {
                let action = guard.ladder.on_transient(DetectorKind::Reasoning, shot_id);
                if let LadderAction::RetryReduced(step) = action {
                    apply_step(&mut guard.cfg, step);
                }
                action
            }
        };

        if !matches!(action, LadderAction::RetryReduced(_)) {
            return DetectorRecord::skipped(
                DetectorKind::Reasoning,
                provenance,
                REASON_RESOURCE_EXHAUSTED,
            );
        }

        let cfg = snapshot_cfg(state);
        // Fingerprint the shrunken context the retry actually ran with.
        let provenance = self.reasoning_provenance(&cfg);
        {
            let mut guard = state.lock().expect("job state lock");
            guard.retries += 1;
        }
        let request = ShotReasoningRequest {
            shot_id,
            frame_refs: ctx
                .shot
                .sample_frames(cfg.qwen_context_max_frames as usize)
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            detector_summary: summarize_records(records),
        };
        match timeout(self.worker_cfg.vl_deadline, self.vl.reason_shot(&request)).await {
            Ok(Ok(payload)) => self.reasoning_record(payload, provenance),
            Ok(Err(VlError::ParseFailed(_))) => {
                DetectorRecord::skipped(DetectorKind::Reasoning, provenance, REASON_PARSE_FAILED)
            }
            Ok(Err(_)) => {
                DetectorRecord::skipped(DetectorKind::Reasoning, provenance, REASON_VL_UNREACHABLE)
            }
            Err(_) => DetectorRecord::skipped(
                DetectorKind::Reasoning,
                provenance,
                REASON_RESOURCE_EXHAUSTED,
            ),
        }
    }

    fn reasoning_record(
        &self,
        payload: ReasoningPayload,
        provenance: Provenance,
    ) -> DetectorRecord {
        DetectorRecord {
            kind: DetectorKind::Reasoning,
            payload: DetectorPayload::Reasoning(payload),
            provenance,
        }
    }

    fn reasoning_provenance(&self, cfg: &AnalysisConfig) -> Provenance {
        Provenance::new(
            "vl-reasoner",
            "1.0.0",
            Some(self.vl.model().to_string()),
            framely_models::params_fingerprint(&cfg.params_slice("vl-reasoner")),
        )
    }

    /// Invoke one detector with pool admission, deadline enforcement and
    /// fallback handling.
    async fn invoke(
        &self,
        det: &Arc<dyn Detector>,
        ctx: &DetectorCtx,
        state: &Arc<Mutex<JobState>>,
        advanced: &Arc<AtomicBool>,
    ) -> DetectorRecord {
        let kind = det.kind();
        let shot_id = ctx.shot.shot_id;
        let cfg = snapshot_cfg(state);
        let provenance = provenance_for(det.as_ref(), &cfg);

        if self.cancelled() {
            return DetectorRecord::skipped(kind, provenance, "aborted");
        }

        // Pool admission. The permit is held for the detector call and the
        // in-place retry, and released on every path by drop.
        let _permit = if det.resource_class().needs_gpu_permit() {
            match self.pool.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return DetectorRecord::skipped(kind, provenance, REASON_INTERNAL);
                }
            }
        } else {
            None
        };

        let started = Instant::now();
        let result = self.detect_with_deadline(det, ctx, &cfg, state).await;
        metrics::histogram!("framely_detector_seconds", "detector" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let fault = match result {
            Ok(payload) => {
                return DetectorRecord { kind, payload, provenance };
            }
            Err(fault) => fault,
        };

        match fault {
            DetectorFault::TransientResource(msg) => {
                metrics::counter!("framely_oom_trips_total").increment(1);
                warn!(shot_id, detector = %kind, %msg, "transient resource fault");

                let action = {
                    let mut guard = state.lock().expect("job state lock");
                    guard.oom_trips += 1;
                    if advanced.swap(true, Ordering::SeqCst) {
                        // Second transient fault in this shot: surface as
                        // skipped without burning another step.
                        LadderAction::SkipExhausted
                    } else {
                        let action = guard.ladder.on_transient(kind, shot_id);
                        if let LadderAction::RetryReduced(step) = action {
                            apply_step(&mut guard.cfg, step);
                        }
                        action
                    }
                };

                match action {
                    LadderAction::RetryReduced(step) => {
                        info!(shot_id, detector = %kind, step = ?step, "retrying under reduced capability");
                        {
                            let mut guard = state.lock().expect("job state lock");
                            guard.retries += 1;
                        }
                        let cfg = snapshot_cfg(state);
                        // Fingerprint the params the retry actually ran with.
                        let provenance = provenance_for(det.as_ref(), &cfg);
                        match self.detect_with_deadline(det, ctx, &cfg, state).await {
                            Ok(payload) => DetectorRecord { kind, payload, provenance },
                            Err(_) => DetectorRecord::skipped(
                                kind,
                                provenance,
                                REASON_RESOURCE_EXHAUSTED,
                            ),
                        }
                    }
                    LadderAction::SkipDisabled(step) => {
                        DetectorRecord::skipped(kind, provenance, step.reason())
                    }
                    LadderAction::SkipExhausted => {
                        DetectorRecord::skipped(kind, provenance, REASON_RESOURCE_EXHAUSTED)
                    }
                }
            }
            DetectorFault::InputDefect(msg) => {
                debug!(shot_id, detector = %kind, %msg, "input defect, slot skipped");
                DetectorRecord::skipped(kind, provenance, format!("input_defect: {msg}"))
            }
            DetectorFault::Internal(msg) | DetectorFault::External(msg) => {
                warn!(shot_id, detector = %kind, %msg, "internal detector fault");
                DetectorRecord::skipped(kind, provenance, REASON_INTERNAL)
            }
        }
    }

    /// Run the detector under its class deadline, isolated in its own
    /// task so a panicking adapter surfaces as an internal fault instead
    /// of unwinding through the DAG (its permit is released by the caller
    /// on every path).
    ///
    /// The first deadline expiry per (shot, kind) maps to a transient
    /// fault (so the ladder can demote); a repeat within the same shot
    /// maps to an internal one.
    async fn detect_with_deadline(
        &self,
        det: &Arc<dyn Detector>,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
        state: &Arc<Mutex<JobState>>,
    ) -> Result<DetectorPayload, DetectorFault> {
        let kind = det.kind();
        let shot_id = ctx.shot.shot_id;
        let deadline = self.worker_cfg.deadline_for(det.resource_class());
        let cancel = self.cancel.clone();

        let det = Arc::clone(det);
        let ctx = ctx.clone();
        let cfg = cfg.clone();
        let mut handle = tokio::spawn(async move { det.detect(&ctx, &cfg).await });

        tokio::select! {
            biased;
            _ = cancelled_signal(cancel) => {
                handle.abort();
                Err(DetectorFault::internal("aborted"))
            }
            joined = timeout(deadline, &mut handle) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    Err(DetectorFault::internal(format!("detector panicked: {join_err}")))
                }
                Err(_elapsed) => {
                    handle.abort();
                    Err(self.deadline_fault(shot_id, kind, state))
                }
            }
        }
    }

    fn deadline_fault(
        &self,
        shot_id: u32,
        kind: DetectorKind,
        state: &Arc<Mutex<JobState>>,
    ) -> DetectorFault {
        let mut guard = state.lock().expect("job state lock");
        if guard.deadline_struck.insert((shot_id, kind)) {
            DetectorFault::transient(format!("{kind} deadline expired"))
        } else {
            DetectorFault::internal(format!("{kind} deadline expired repeatedly"))
        }
    }
}

/// Resolves only when the job is cancelled; pends forever if the sender
/// is dropped without signalling.
async fn cancelled_signal(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            futures_util::future::pending::<()>().await;
        }
    }
}

fn snapshot_cfg(state: &Arc<Mutex<JobState>>) -> AnalysisConfig {
    state.lock().expect("job state lock").cfg.clone()
}

/// Apply a parameter-shrinking ladder step to the job config.
fn apply_step(cfg: &mut AnalysisConfig, step: framely_models::LadderStep) {
    use framely_models::LadderStep;
    match step {
        LadderStep::ShrinkVlContext => {
            cfg.qwen_context_max_frames = (cfg.qwen_context_max_frames / 2).max(4);
        }
        LadderStep::SingleScaleTiling => {
            cfg.ablations.no_tiling = true;
        }
        _ => {}
    }
}

/// Compact Phase A/B summary handed to the VL reasoner.
fn summarize_records(records: &[DetectorRecord]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for record in records {
        match &record.payload {
            DetectorPayload::Objects(p) => {
                let mut classes: Vec<&str> = p.boxes.iter().map(|b| b.class.as_str()).collect();
                classes.sort_unstable();
                classes.dedup();
                parts.push(format!("{} objects ({})", p.boxes.len(), classes.join(", ")));
            }
            DetectorPayload::Faces(p) => parts.push(format!("{} faces", p.faces.len())),
            DetectorPayload::Text(p) => parts.push(format!("{} text regions", p.regions.len())),
            DetectorPayload::Motion(p) => {
                parts.push(format!("motion {:.2}", p.mean_motion));
            }
            DetectorPayload::Audio(p) => {
                parts.push(format!(
                    "loudness {:.1} LUFS, {} speech spans",
                    p.lufs_integrated,
                    p.speech_spans.len()
                ));
            }
            DetectorPayload::Transition(p) => {
                parts.push(format!("transition in: {:?} (ssim {:.2})", p.kind, p.ssim));
            }
            _ => {}
        }
    }
    if parts.is_empty() {
        "no detector findings".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_covers_present_payloads() {
        let records = vec![DetectorRecord {
            kind: DetectorKind::Faces,
            payload: DetectorPayload::Faces(framely_models::FacesPayload {
                faces: vec![framely_models::FaceBox {
                    bbox: framely_models::BoundingBox::new(0, 0, 10, 10),
                    confidence: 0.9,
                }],
            }),
            provenance: Provenance::stub("facescan", "1.1.0"),
        }];
        assert_eq!(summarize_records(&records), "1 faces");
        assert_eq!(summarize_records(&[]), "no detector findings");
    }

    #[test]
    fn apply_step_halves_vl_context_with_floor() {
        let mut cfg = AnalysisConfig::default();
        cfg.qwen_context_max_frames = 16;
        apply_step(&mut cfg, framely_models::LadderStep::ShrinkVlContext);
        assert_eq!(cfg.qwen_context_max_frames, 8);
        apply_step(&mut cfg, framely_models::LadderStep::ShrinkVlContext);
        apply_step(&mut cfg, framely_models::LadderStep::ShrinkVlContext);
        apply_step(&mut cfg, framely_models::LadderStep::ShrinkVlContext);
        assert_eq!(cfg.qwen_context_max_frames, 4);
    }
}
