//! End-to-end scheduler tests with substituted detector adapters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use framely_media::{Detector, DetectorCtx, DetectorSet, PrepOutput, VideoInfo};
use framely_models::{
    AnalysisConfig, AudioPayload, BoundingBox, ColorPayload, DetectionPass, DetectorFault,
    DetectorKind, DetectorPayload, FaceBox, FacesPayload, LadderStep, MasksPayload, MotionPayload,
    ObjectBox, ObjectsPayload, ResourceClass, Shot, SpeechSpan, SrPayload, StatusState, TextBox,
    TextPayload, TransitionKind, TransitionPayload, VideoId,
};
use framely_vl_client::{VlClient, VlConfig};
use framely_worker::coverage::compute_coverage;
use framely_worker::merge::{assemble, MergeInputs};
use framely_worker::scheduler::REASON_NO_ADJACENT_SHOT;
use framely_worker::{GpuPool, NoopProgress, Scheduler, WorkerConfig};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Ok,
    TransientAlways,
    Internal,
    Panic,
}

struct MockDetector {
    kind: DetectorKind,
    class: ResourceClass,
    tool: &'static str,
    mode: Mode,
}

#[async_trait]
impl Detector for MockDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn tool(&self) -> &'static str {
        self.tool
    }

    fn version(&self) -> &'static str {
        "0.0.0-test"
    }

    fn resource_class(&self) -> ResourceClass {
        self.class
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        _cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        match self.mode {
            Mode::TransientAlways => Err(DetectorFault::transient("simulated OOM")),
            Mode::Internal => Err(DetectorFault::internal("simulated fault")),
            Mode::Panic => panic!("simulated panic"),
            Mode::Ok => Ok(ok_payload(self.kind, ctx)),
        }
    }
}

fn ok_payload(kind: DetectorKind, ctx: &DetectorCtx) -> DetectorPayload {
    let bbox = BoundingBox::new(100, 100, 80, 80);
    match kind {
        DetectorKind::ObjectsCoarse | DetectorKind::ObjectsTiled | DetectorKind::ObjectsFine => {
            DetectorPayload::Objects(ObjectsPayload {
                boxes: vec![ObjectBox {
                    bbox,
                    class: "subject".into(),
                    confidence: 0.9,
                    pass: DetectionPass::Coarse,
                }],
                frame_w: 640,
                frame_h: 360,
                tiles_analyzed: 4,
            })
        }
        DetectorKind::SuperResolution => DetectorPayload::Sr(SrPayload {
            applied: true,
            scale_factor: 4,
            frames_upscaled: 3,
        }),
        DetectorKind::MaskRefinement => DetectorPayload::Masks(MasksPayload::default()),
        DetectorKind::Faces => DetectorPayload::Faces(FacesPayload {
            faces: vec![FaceBox { bbox, confidence: 0.95 }],
        }),
        DetectorKind::Text => DetectorPayload::Text(TextPayload {
            regions: vec![TextBox {
                bbox: BoundingBox::new(100, 300, 200, 30),
                confidence: 0.8,
                est_glyph_px: 20,
                caption_band: true,
            }],
        }),
        DetectorKind::Color => DetectorPayload::Color(ColorPayload::default()),
        DetectorKind::Motion => DetectorPayload::Motion(MotionPayload::default()),
        DetectorKind::Audio => DetectorPayload::Audio(AudioPayload {
            lufs_integrated: -16.0,
            true_peak_dbtp: -3.0,
            speech_spans: vec![SpeechSpan { start_s: 0.0, end_s: 0.5 }],
            clarity: Some(0.92),
            stereo_phase: 1.0,
            lufs_trace: 1.0,
            ..Default::default()
        }),
        DetectorKind::Transition => DetectorPayload::Transition(TransitionPayload {
            kind: TransitionKind::Cut,
            ssim: 0.1,
            from_shot: ctx.prev_shot.as_ref().map(|s| s.shot_id).unwrap_or(0),
            to_shot: ctx.shot.shot_id,
        }),
        DetectorKind::Reasoning => unreachable!("reasoning is not an adapter"),
    }
}

fn mock_set(overrides: HashMap<DetectorKind, Mode>) -> Arc<DetectorSet> {
    let table: [(DetectorKind, ResourceClass, &'static str); 11] = [
        (DetectorKind::ObjectsCoarse, ResourceClass::GpuHeavy, "yolo-coarse"),
        (DetectorKind::ObjectsTiled, ResourceClass::GpuHeavy, "yolo-tiled"),
        (DetectorKind::SuperResolution, ResourceClass::GpuHeavy, "realesrgan"),
        (DetectorKind::ObjectsFine, ResourceClass::GpuHeavy, "yolo-fine"),
        (DetectorKind::MaskRefinement, ResourceClass::GpuHeavy, "segrefine"),
        (DetectorKind::Faces, ResourceClass::GpuLight, "facescan"),
        (DetectorKind::Text, ResourceClass::GpuLight, "textspot"),
        (DetectorKind::Color, ResourceClass::Cpu, "colorstat"),
        (DetectorKind::Motion, ResourceClass::Cpu, "flowstat"),
        (DetectorKind::Audio, ResourceClass::Cpu, "audio-meter"),
        (DetectorKind::Transition, ResourceClass::Cpu, "ssim-transition"),
    ];
    let detectors = table
        .into_iter()
        .map(|(kind, class, tool)| {
            let mode = overrides.get(&kind).copied().unwrap_or(Mode::Ok);
            Arc::new(MockDetector { kind, class, tool, mode }) as Arc<dyn Detector>
        })
        .collect();
    Arc::new(DetectorSet::with_detectors(detectors))
}

fn make_prep(shot_count: u32, frames_per_shot: u64) -> PrepOutput {
    let fps = 30.0;
    let shots = (0..shot_count)
        .map(|i| {
            let start = i as u64 * frames_per_shot;
            let end = start + frames_per_shot;
            Shot {
                shot_id: i,
                start_frame: start,
                end_frame: end,
                frame_count: frames_per_shot,
                duration_s: frames_per_shot as f64 / fps,
                frame_paths: (start..end)
                    .map(|f| PathBuf::from(format!("frames/frame_{f:08}.jpg")))
                    .collect(),
                audio_window: framely_models::AudioWindow {
                    start_s: start as f64 / fps,
                    end_s: end as f64 / fps,
                },
            }
        })
        .collect();
    PrepOutput {
        info: VideoInfo {
            duration_s: shot_count as f64 * frames_per_shot as f64 / fps,
            fps,
            width: 640,
            height: 360,
            total_frames: shot_count as u64 * frames_per_shot,
            has_audio: true,
        },
        shots,
        frames_dir: PathBuf::from("frames"),
        audio_path: None,
    }
}

async fn good_vl_server() -> MockServer {
    let server = MockServer::start().await;
    let content = r#"{"summary":"two people talk","mood":"calm","intent":"dialogue","composition_notes":["eye-level framing"],"transition_guess":"cut"}"#;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })))
        .mount(&server)
        .await;
    server
}

fn vl_client(api_base: String) -> Arc<VlClient> {
    Arc::new(
        VlClient::new(VlConfig {
            api_base,
            model: "test-model".into(),
            request_timeout: Duration::from_secs(2),
            max_attempts: 3,
            base_delay: Duration::from_millis(2),
        })
        .unwrap(),
    )
}

fn worker_cfg() -> WorkerConfig {
    WorkerConfig {
        max_shot_parallel: 1,
        gpu_deadline: Duration::from_secs(10),
        cpu_deadline: Duration::from_secs(10),
        vl_deadline: Duration::from_secs(10),
        ..WorkerConfig::default()
    }
}

fn scheduler(detectors: Arc<DetectorSet>, vl: Arc<VlClient>, capacity: usize) -> Scheduler {
    // Dropping the sender leaves the job un-cancelled for its whole run.
    let (_tx, rx) = watch::channel(false);
    Scheduler::new(detectors, vl, GpuPool::new(capacity), worker_cfg(), rx)
}

fn assemble_bundle(
    video_id: &VideoId,
    prep: &PrepOutput,
    run: &framely_worker::JobRun,
) -> framely_models::Vab {
    let coverage = compute_coverage(run, &prep.info);
    assemble(
        MergeInputs {
            video_id,
            video_path: format!("store/{video_id}/video.mp4"),
            sha256: "0".repeat(64),
            info: &prep.info,
            run,
            internal_error_budget: 0.2,
            latency_ms: Default::default(),
            gpu_mem_mb_peak: 0,
        },
        coverage,
    )
}

#[tokio::test]
async fn happy_path_produces_complete_ok_bundle() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t1").unwrap();
    let prep = make_prep(3, 30);
    let sched = scheduler(mock_set(HashMap::new()), vl_client(format!("{}/v1", server.uri())), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(run.shot_outcomes.len(), 3);
    assert!(run.fired_steps.is_empty());
    assert_eq!(run.oom_trips, 0);

    // Every enabled detector kind has a slot in every shot.
    for outcome in &run.shot_outcomes {
        assert_eq!(outcome.records.len(), 12);
        assert!(outcome.sr_used);
        assert!(outcome.record(DetectorKind::Reasoning).is_some());
    }

    // Shot 0 has no predecessor.
    let shot0_transition = run.shot_outcomes[0].record(DetectorKind::Transition).unwrap();
    assert_eq!(
        shot0_transition.provenance.skipped_reason.as_deref(),
        Some(REASON_NO_ADJACENT_SHOT)
    );
    assert!(run.shot_outcomes[1].record(DetectorKind::Transition).unwrap().provenance.skipped_reason.is_none());

    let vab = assemble_bundle(&video_id, &prep, &run);
    assert_eq!(vab.status.state, StatusState::Ok);
    vab.validate().unwrap();

    assert_eq!(vab.status.coverage.temporal.frames_analyzed_pct, 100.0);
    assert_eq!(vab.status.coverage.spatial.pixels_covered_pct, 100.0);
    assert_eq!(vab.status.coverage.audio.stoi_pct, 100.0);

    // One provenance entry per tool family at least.
    for tool in [
        "yolo-coarse", "yolo-tiled", "realesrgan", "yolo-fine", "segrefine", "facescan",
        "textspot", "colorstat", "flowstat", "audio-meter", "ssim-transition", "vl-reasoner",
    ] {
        assert!(
            vab.provenance.iter().any(|p| p.tool == tool),
            "missing provenance for {tool}"
        );
    }

    // Reasoning flows into the shot entries.
    assert_eq!(vab.shots[0].summary, "two people talk");
    assert_eq!(vab.shots[0].mood, "calm");
}

#[tokio::test]
async fn oom_on_mask_refinement_disables_it_for_the_job() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t-oom").unwrap();
    let prep = make_prep(3, 30);
    let overrides = HashMap::from([(DetectorKind::MaskRefinement, Mode::TransientAlways)]);
    let sched = scheduler(mock_set(overrides), vl_client(format!("{}/v1", server.uri())), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    // Exactly one ladder firing, on the first shot that hit the fault.
    assert_eq!(run.fired_steps.len(), 1);
    assert_eq!(run.fired_steps[0].step, LadderStep::DisableMaskRefinement);
    assert_eq!(run.fired_steps[0].shot_id, 0);
    assert!(run.oom_trips >= 1);

    // The offending shot and all subsequent shots skip mask refinement.
    for outcome in &run.shot_outcomes {
        let record = outcome.record(DetectorKind::MaskRefinement).unwrap();
        assert_eq!(
            record.provenance.skipped_reason.as_deref(),
            Some("mask_refinement_disabled"),
            "shot {}",
            outcome.shot.shot_id
        );
    }

    let vab = assemble_bundle(&video_id, &prep, &run);
    assert_eq!(vab.status.state, StatusState::Degraded);
    assert!(vab.status.reasons.iter().any(|r| r == "mask_refinement_disabled"));
    assert!(vab.video.metrics.oom_trips >= 1);
    vab.validate().unwrap();
}

#[tokio::test]
async fn vl_endpoint_down_skips_reasoning_only() {
    let video_id = VideoId::parse("t-vl").unwrap();
    let prep = make_prep(2, 30);
    // Nothing listens on port 9; every attempt is refused immediately.
    let sched = scheduler(mock_set(HashMap::new()), vl_client("http://127.0.0.1:9/v1".into()), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    for outcome in &run.shot_outcomes {
        let reasoning = outcome.record(DetectorKind::Reasoning).unwrap();
        assert_eq!(reasoning.provenance.skipped_reason.as_deref(), Some("vl_unreachable"));
        // Other detectors are unaffected.
        assert!(outcome.record(DetectorKind::ObjectsCoarse).unwrap().provenance.skipped_reason.is_none());
        assert!(outcome.record(DetectorKind::Audio).unwrap().provenance.skipped_reason.is_none());
    }

    let vab = assemble_bundle(&video_id, &prep, &run);
    assert_eq!(vab.status.state, StatusState::Degraded);
    assert!(vab.status.reasons.iter().any(|r| r.contains("vl_unreachable")));
}

#[tokio::test]
async fn no_sr_ablation_skips_sr_without_ladder_or_degradation() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t-nosr").unwrap();
    let prep = make_prep(2, 30);
    let sched = scheduler(mock_set(HashMap::new()), vl_client(format!("{}/v1", server.uri())), 2);

    let cfg = AnalysisConfig::default().with_ablations(framely_models::AblationFlags {
        no_sr: true,
        ..Default::default()
    });
    let run = sched
        .run_job(&video_id, &prep, cfg, &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    assert!(run.fired_steps.is_empty());
    for outcome in &run.shot_outcomes {
        assert!(!outcome.sr_used);
        for kind in [DetectorKind::SuperResolution, DetectorKind::ObjectsFine] {
            let record = outcome.record(kind).unwrap();
            assert_eq!(
                record.provenance.skipped_reason.as_deref(),
                Some("sr_disabled_by_ablation")
            );
        }
    }

    let vab = assemble_bundle(&video_id, &prep, &run);
    assert_eq!(vab.status.state, StatusState::Ok);
    assert!(vab.status.reasons.iter().any(|r| r == "sr_disabled_by_ablation"));
    assert_eq!(vab.status.coverage.spatial.pixels_covered_pct, 100.0);
    assert!(!vab.shots.iter().any(|s| s.detectors.sr_used));
}

#[tokio::test]
async fn single_shot_video_yields_one_scene_and_skipped_transition() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t-single").unwrap();
    let prep = make_prep(1, 60);
    let sched = scheduler(mock_set(HashMap::new()), vl_client(format!("{}/v1", server.uri())), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    let vab = assemble_bundle(&video_id, &prep, &run);
    assert_eq!(vab.shots.len(), 1);
    assert_eq!(vab.scenes.len(), 1);
    assert_eq!(vab.scenes[0].shots, vec![0]);
    let transition = run.shot_outcomes[0].record(DetectorKind::Transition).unwrap();
    assert_eq!(
        transition.provenance.skipped_reason.as_deref(),
        Some(REASON_NO_ADJACENT_SHOT)
    );
    vab.validate().unwrap();
}

#[tokio::test]
async fn faulting_detectors_never_leak_pool_permits() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t-leak").unwrap();
    let prep = make_prep(4, 30);
    let overrides = HashMap::from([
        (DetectorKind::Faces, Mode::Panic),
        (DetectorKind::MaskRefinement, Mode::TransientAlways),
        (DetectorKind::Text, Mode::Internal),
    ]);
    let sched = scheduler(mock_set(overrides), vl_client(format!("{}/v1", server.uri())), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    // The pool is back at full capacity after the job.
    assert_eq!(sched.pool().available(), sched.pool().capacity());
    assert_eq!(sched.pool().in_use(), 0);
    assert!(sched.pool().high_water() >= 1);

    // Panics surface as internal faults, not crashes.
    for outcome in &run.shot_outcomes {
        assert_eq!(
            outcome.record(DetectorKind::Faces).unwrap().provenance.skipped_reason.as_deref(),
            Some("internal_error")
        );
    }
}

#[tokio::test]
async fn internal_error_budget_degrades_the_bundle() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t-budget").unwrap();
    let prep = make_prep(3, 30);
    let overrides = HashMap::from([(DetectorKind::Color, Mode::Internal)]);
    let sched = scheduler(mock_set(overrides), vl_client(format!("{}/v1", server.uri())), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(run.internal_shots, 3);

    let vab = assemble_bundle(&video_id, &prep, &run);
    assert_eq!(vab.status.state, StatusState::Degraded);
    assert!(vab.status.reasons.iter().any(|r| r == "internal_error_budget_exceeded"));
}

#[tokio::test]
async fn scene_partition_law_holds_under_mixed_transitions() {
    let server = good_vl_server().await;
    let video_id = VideoId::parse("t-scenes").unwrap();
    let prep = make_prep(5, 24);
    let sched = scheduler(mock_set(HashMap::new()), vl_client(format!("{}/v1", server.uri())), 2);

    let run = sched
        .run_job(&video_id, &prep, AnalysisConfig::default(), &PathBuf::from("work"), &NoopProgress)
        .await
        .unwrap();

    let vab = assemble_bundle(&video_id, &prep, &run);
    let mut scene_shots: Vec<u32> = vab.scenes.iter().flat_map(|s| s.shots.clone()).collect();
    scene_shots.sort_unstable();
    let mut shot_ids: Vec<u32> = vab.shots.iter().map(|s| s.shot_id).collect();
    shot_ids.sort_unstable();
    assert_eq!(scene_shots, shot_ids);
    vab.validate().unwrap();
}
