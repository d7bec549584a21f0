//! Merge and assembly: shots into scenes, scenes into the bundle.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::json;
use tracing::info;

use framely_media::{calibration_table, VideoInfo};
use framely_models::{
    CoverageReport, DetectionCounts, DetectorKind, DetectorPayload, DetectorRecord, GlobalStats,
    Provenance, Resolution, Risk, RiskKind, RunMetrics, Scene, SceneFeatures, SceneNarrative,
    Severity, ShotDetectors, ShotEntry, StatusState, Track, TransitionKind, Vab, VabStatus,
    VideoId, VideoMeta, SCHEMA_VERSION,
};

use crate::scheduler::{JobRun, ShotOutcome, REASON_NO_ADJACENT_SHOT, REASON_SR_ABLATED, REASON_SR_NOT_APPLIED, REASON_STOI_DISABLED};

/// Minimum boundary SSIM for two adjacent shots to share a scene.
const SCENE_SSIM_MIN: f64 = 0.45;
/// Maximum inter-shot time gap inside one scene, seconds.
const MAX_SCENE_GAP_S: f64 = 2.0;
/// IoU for linking same-class detections across adjacent shots.
const TRACK_IOU_MIN: f64 = 0.3;
/// True peak above this raises an audio clipping risk, dBTP.
const CLIPPING_DBTP: f64 = -1.0;

/// Skip reasons that do not degrade the bundle: user choices and
/// structural impossibilities, not capability loss.
fn reason_is_benign(reason: &str) -> bool {
    matches!(
        reason,
        REASON_NO_ADJACENT_SHOT | REASON_SR_ABLATED | REASON_SR_NOT_APPLIED | REASON_STOI_DISABLED
    )
}

/// Everything the assembler needs from the stages before it.
pub struct MergeInputs<'a> {
    pub video_id: &'a VideoId,
    pub video_path: String,
    pub sha256: String,
    pub info: &'a VideoInfo,
    pub run: &'a JobRun,
    pub internal_error_budget: f64,
    pub latency_ms: BTreeMap<String, u64>,
    pub gpu_mem_mb_peak: u64,
}

/// Build the bundle from per-shot detector results.
pub fn assemble(inputs: MergeInputs<'_>, coverage: CoverageReport) -> Vab {
    let run = inputs.run;
    let shots: Vec<ShotEntry> = run.shot_outcomes.iter().map(shot_entry).collect();
    let scenes = group_scenes(&run.shot_outcomes);
    let tracks = link_tracks(&run.shot_outcomes);
    let risks = synthesize_risks(run);
    let provenance = dedup_provenance(&run.shot_outcomes);
    let global = global_stats(inputs.info, &shots);

    let mut reasons = collect_reasons(run);
    let violations = run.effective_cfg.thresholds.violations(&coverage);
    let degraded = !violations.is_empty()
        || !run.fired_steps.is_empty()
        || has_non_benign_skip(&run.shot_outcomes)
        || internal_budget_exceeded(run, inputs.internal_error_budget);
    reasons.extend(violations);
    if internal_budget_exceeded(run, inputs.internal_error_budget) {
        reasons.push("internal_error_budget_exceeded".to_string());
    }

    let state = if degraded { StatusState::Degraded } else { StatusState::Ok };
    info!(
        video_id = %inputs.video_id,
        state = ?state,
        shots = shots.len(),
        scenes = scenes.len(),
        risks = risks.len(),
        "bundle assembled"
    );

    Vab {
        schema_version: SCHEMA_VERSION.to_string(),
        status: VabStatus { state, reasons, coverage },
        video: VideoMeta {
            video_id: inputs.video_id.to_string(),
            path: inputs.video_path,
            sha256: inputs.sha256,
            metrics: RunMetrics {
                latency_ms: inputs.latency_ms,
                gpu_mem_mb_peak: inputs.gpu_mem_mb_peak,
                retries: run.retries,
                oom_trips: run.oom_trips,
            },
        },
        global,
        scenes,
        shots,
        tracks,
        risks,
        provenance,
        calibration: calibration_table(),
    }
}

fn internal_budget_exceeded(run: &JobRun, budget: f64) -> bool {
    let total = run.shot_outcomes.len().max(1);
    run.internal_shots as f64 / total as f64 > budget
}

fn has_non_benign_skip(outcomes: &[ShotOutcome]) -> bool {
    outcomes.iter().any(|o| {
        o.records.iter().any(|r| {
            r.provenance.skipped_reason.as_deref().is_some_and(|reason| !reason_is_benign(reason))
        })
    })
}

/// One bundle entry per shot, detector slots filled from the records.
fn shot_entry(outcome: &ShotOutcome) -> ShotEntry {
    let mut detectors = ShotDetectors { sr_used: outcome.sr_used, ..Default::default() };
    let mut summary = String::new();
    let mut mood = String::new();
    let mut intent = String::new();
    let mut composition_notes = Vec::new();
    let mut transition_guess = String::new();

    for record in &outcome.records {
        match &record.payload {
            // Later object passes refine earlier ones; last write wins.
            DetectorPayload::Objects(p) => detectors.objects = Some(p.clone()),
            DetectorPayload::Masks(p) => detectors.masks = Some(p.clone()),
            DetectorPayload::Faces(p) => detectors.faces = Some(p.clone()),
            DetectorPayload::Text(p) => detectors.text = Some(p.clone()),
            DetectorPayload::Color(p) => detectors.color = Some(p.clone()),
            DetectorPayload::Motion(p) => detectors.motion = Some(p.clone()),
            DetectorPayload::Audio(p) => detectors.audio = Some(p.clone()),
            DetectorPayload::Transition(p) => detectors.transition = Some(p.clone()),
            DetectorPayload::Reasoning(p) => {
                summary = p.summary.clone();
                mood = p.mood.clone();
                intent = p.intent.clone();
                composition_notes = p.composition_notes.clone();
                transition_guess = p.transition_guess.clone();
            }
            DetectorPayload::Sr(_) | DetectorPayload::Empty => {}
        }
    }

    let shot = &outcome.shot;
    ShotEntry {
        shot_id: shot.shot_id,
        start_frame: shot.start_frame,
        end_frame: shot.end_frame,
        frame_count: shot.frame_count,
        duration_s: shot.duration_s,
        detectors,
        summary,
        mood,
        intent,
        composition_notes,
        transition_guess,
    }
}

/// Group consecutive shots into scenes.
///
/// A shot joins the running scene when its boundary transition is not a
/// cut, the boundary SSIM clears the similarity floor, and the time gap
/// is within bounds. A `cut` breaks the scene unconditionally.
fn group_scenes(outcomes: &[ShotOutcome]) -> Vec<Scene> {
    let mut scenes: Vec<Vec<&ShotOutcome>> = Vec::new();

    for (i, outcome) in outcomes.iter().enumerate() {
        let joins_previous = i > 0
            && outcome.record(DetectorKind::Transition).is_some_and(|record| {
                match &record.payload {
                    DetectorPayload::Transition(t) => {
                        t.kind != TransitionKind::Cut
                            && t.ssim >= SCENE_SSIM_MIN
                            && shot_gap_s(&outcomes[i - 1], outcome) <= MAX_SCENE_GAP_S
                    }
                    _ => false,
                }
            });

        if joins_previous {
            scenes.last_mut().expect("joins_previous implies a scene").push(outcome);
        } else {
            scenes.push(vec![outcome]);
        }
    }

    scenes
        .into_iter()
        .enumerate()
        .map(|(scene_id, members)| build_scene(scene_id as u32, &members))
        .collect()
}

fn shot_gap_s(prev: &ShotOutcome, next: &ShotOutcome) -> f64 {
    (next.shot.audio_window.start_s - prev.shot.audio_window.end_s).max(0.0)
}

fn build_scene(scene_id: u32, members: &[&ShotOutcome]) -> Scene {
    let mut features = SceneFeatures::default();
    let mut colors: Vec<String> = Vec::new();
    let mut motion_sum = 0f32;
    let mut brightness_sum = 0f32;
    let mut lufs_sum = 0f64;
    let mut lufs_count = 0u32;
    let mut narrative: Option<SceneNarrative> = None;

    for outcome in members {
        for record in &outcome.records {
            match &record.payload {
                DetectorPayload::Color(p) => {
                    brightness_sum += p.brightness;
                    for c in &p.dominant {
                        if !colors.contains(c) {
                            colors.push(c.clone());
                        }
                    }
                }
                DetectorPayload::Motion(p) => motion_sum += p.mean_motion,
                DetectorPayload::Audio(p) => {
                    lufs_sum += p.lufs_integrated;
                    lufs_count += 1;
                }
                DetectorPayload::Faces(p) => features.face_count += p.faces.len() as u64,
                DetectorPayload::Objects(p) => {
                    features.object_count = features.object_count.max(p.boxes.len() as u64)
                }
                DetectorPayload::Reasoning(p) if narrative.is_none() => {
                    narrative = Some(SceneNarrative {
                        summary: p.summary.clone(),
                        mood: p.mood.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    let n = members.len().max(1) as f32;
    colors.truncate(5);
    features.dominant_colors = colors;
    features.mean_motion = motion_sum / n;
    features.mean_brightness = brightness_sum / n;
    features.mean_lufs = if lufs_count > 0 { lufs_sum / lufs_count as f64 } else { -70.0 };

    Scene {
        scene_id,
        shots: members.iter().map(|o| o.shot.shot_id).collect(),
        start_frame: members.first().map(|o| o.shot.start_frame).unwrap_or(0),
        end_frame: members.last().map(|o| o.shot.end_frame).unwrap_or(0),
        features,
        narrative,
    }
}

/// Greedy linking of same-class detections across consecutive shots.
fn link_tracks(outcomes: &[ShotOutcome]) -> Vec<Track> {
    struct OpenTrack {
        track_id: u32,
        class: String,
        first_shot: u32,
        last_shot: u32,
        last_bbox: framely_models::BoundingBox,
        observations: u32,
    }

    let mut open: Vec<OpenTrack> = Vec::new();
    let mut next_id = 0u32;

    for outcome in outcomes {
        let Some(objects) = outcome.records.iter().rev().find_map(|r| match &r.payload {
            DetectorPayload::Objects(p) => Some(p),
            _ => None,
        }) else {
            continue;
        };
        let shot_id = outcome.shot.shot_id;

        for object in &objects.boxes {
            let candidate = open.iter_mut().find(|t| {
                t.class == object.class
                    && t.last_shot + 1 == shot_id
                    && t.last_bbox.iou(&object.bbox) >= TRACK_IOU_MIN
            });
            match candidate {
                Some(track) => {
                    track.last_shot = shot_id;
                    track.last_bbox = object.bbox;
                    track.observations += 1;
                }
                None => {
                    open.push(OpenTrack {
                        track_id: next_id,
                        class: object.class.clone(),
                        first_shot: shot_id,
                        last_shot: shot_id,
                        last_bbox: object.bbox,
                        observations: 1,
                    });
                    next_id += 1;
                }
            }
        }
    }

    open.into_iter()
        .filter(|t| t.observations >= 2)
        .map(|t| Track {
            track_id: t.track_id,
            class: t.class,
            first_shot: t.first_shot,
            last_shot: t.last_shot,
            observations: t.observations,
        })
        .collect()
}

/// Derive risk flags from detector metrics.
fn synthesize_risks(run: &JobRun) -> Vec<Risk> {
    let mut risks = Vec::new();

    for outcome in &run.shot_outcomes {
        let shot_id = outcome.shot.shot_id;
        let stoi_min = run.effective_cfg.stoi.min_ok;

        if let Some(DetectorPayload::Audio(audio)) =
            outcome.record(DetectorKind::Audio).map(|r| &r.payload)
        {
            if let Some(clarity) = audio.clarity {
                if clarity < stoi_min {
                    let severity =
                        if clarity < stoi_min - 0.2 { Severity::High } else { Severity::Med };
                    risks.push(Risk::new(
                        shot_id,
                        RiskKind::LowDialogueIntelligibility,
                        severity,
                        json!({ "stoi": clarity, "threshold": stoi_min }),
                    ));
                }
            }
            if audio.true_peak_dbtp > CLIPPING_DBTP {
                let severity =
                    if audio.true_peak_dbtp > 0.0 { Severity::High } else { Severity::Med };
                risks.push(Risk::new(
                    shot_id,
                    RiskKind::AudioClipping,
                    severity,
                    json!({ "true_peak_dbtp": audio.true_peak_dbtp }),
                ));
            }
        }

        if let (Some(DetectorPayload::Text(text)), Some(DetectorPayload::Faces(faces))) = (
            outcome.record(DetectorKind::Text).map(|r| &r.payload),
            outcome.record(DetectorKind::Faces).map(|r| &r.payload),
        ) {
            let overlap = text.regions.iter().filter(|t| t.caption_band).find_map(|t| {
                faces
                    .faces
                    .iter()
                    .find(|f| t.bbox.overlaps(&f.bbox))
                    .map(|f| (t.bbox, f.bbox))
            });
            if let Some((text_bbox, face_bbox)) = overlap {
                risks.push(Risk::new(
                    shot_id,
                    RiskKind::CaptionFaceOverlap,
                    Severity::Med,
                    json!({ "text_bbox": text_bbox, "face_bbox": face_bbox }),
                ));
            }
        }
    }

    // Any ladder firing past the second step degrades detection quality
    // enough to flag.
    for fired in &run.fired_steps {
        if fired.index >= 2 {
            risks.push(Risk::new(
                fired.shot_id,
                RiskKind::DegradedDetection,
                Severity::Med,
                json!({ "step": fired.step.reason(), "detector": fired.detector.as_str() }),
            ));
        }
    }

    risks
}

/// Top-level provenance: unique by (tool, version, params_hash), in
/// insertion order of first appearance.
fn dedup_provenance(outcomes: &[ShotOutcome]) -> Vec<Provenance> {
    let mut seen = BTreeSet::new();
    let mut provenance = Vec::new();
    for record in outcomes.iter().flat_map(|o| &o.records) {
        if seen.insert(record.provenance.dedup_key()) {
            provenance.push(record.provenance.clone());
        }
    }
    provenance
}

/// Status reasons: fired ladder steps, then skipped detectors, deduped in
/// first-appearance order.
fn collect_reasons(run: &JobRun) -> Vec<String> {
    let mut reasons: Vec<String> = Vec::new();
    let mut push_unique = |reason: String, reasons: &mut Vec<String>| {
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    };

    for fired in &run.fired_steps {
        push_unique(fired.step.reason().to_string(), &mut reasons);
    }
    for outcome in &run.shot_outcomes {
        for record in &outcome.records {
            if let Some(reason) = &record.provenance.skipped_reason {
                if reason_is_benign(reason) {
                    push_unique(reason.clone(), &mut reasons);
                } else {
                    push_unique(format!("{}_skipped:{}", record.kind, reason), &mut reasons);
                }
            }
        }
    }
    reasons
}

fn global_stats(info: &VideoInfo, shots: &[ShotEntry]) -> GlobalStats {
    let mut detections = DetectionCounts::default();
    for shot in shots {
        if let Some(objects) = &shot.detectors.objects {
            for object in &objects.boxes {
                *detections.objects_by_class.entry(object.class.clone()).or_default() += 1;
            }
        }
        if let Some(faces) = &shot.detectors.faces {
            detections.faces += faces.faces.len() as u64;
        }
        if let Some(text) = &shot.detectors.text {
            detections.text_regions += text.regions.len() as u64;
        }
    }

    GlobalStats {
        total_frames: info.total_frames,
        duration_s: info.duration_s,
        fps: info.fps,
        resolution: Resolution { w: info.width, h: info.height },
        detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framely_models::{
        AnalysisConfig, AudioPayload, AudioWindow, BoundingBox, DetectionPass, FaceBox,
        FacesPayload, ObjectBox, ObjectsPayload, Shot, TextBox, TextPayload, TransitionPayload,
    };

    fn shot(id: u32, start: u64, end: u64) -> Shot {
        Shot {
            shot_id: id,
            start_frame: start,
            end_frame: end,
            frame_count: end - start,
            duration_s: (end - start) as f64 / 30.0,
            frame_paths: Vec::new(),
            audio_window: AudioWindow {
                start_s: start as f64 / 30.0,
                end_s: end as f64 / 30.0,
            },
        }
    }

    fn transition_record(kind: TransitionKind, ssim: f64, from: u32, to: u32) -> DetectorRecord {
        DetectorRecord {
            kind: DetectorKind::Transition,
            payload: DetectorPayload::Transition(TransitionPayload {
                kind,
                ssim,
                from_shot: from,
                to_shot: to,
            }),
            provenance: Provenance::stub("ssim-transition", "1.2.0"),
        }
    }

    fn outcome(shot: Shot, records: Vec<DetectorRecord>) -> ShotOutcome {
        ShotOutcome { shot, records, sr_used: false }
    }

    fn run_with(outcomes: Vec<ShotOutcome>) -> JobRun {
        JobRun {
            shot_outcomes: outcomes,
            fired_steps: Vec::new(),
            oom_trips: 0,
            retries: 0,
            internal_shots: 0,
            gpu_high_water: 0,
            effective_cfg: AnalysisConfig::default(),
            detect_elapsed_ms: 0,
        }
    }

    #[test]
    fn cut_breaks_scene_unconditionally() {
        let outcomes = vec![
            outcome(shot(0, 0, 30), vec![]),
            // High SSIM but classified cut: still a scene break.
            outcome(shot(1, 30, 60), vec![transition_record(TransitionKind::Cut, 0.9, 0, 1)]),
            outcome(
                shot(2, 60, 90),
                vec![transition_record(TransitionKind::Continuous, 0.8, 1, 2)],
            ),
        ];
        let scenes = group_scenes(&outcomes);
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].shots, vec![0]);
        assert_eq!(scenes[1].shots, vec![1, 2]);
    }

    #[test]
    fn low_ssim_dissolve_starts_a_new_scene() {
        let outcomes = vec![
            outcome(shot(0, 0, 30), vec![]),
            outcome(
                shot(1, 30, 60),
                vec![transition_record(TransitionKind::Dissolve, 0.3, 0, 1)],
            ),
        ];
        let scenes = group_scenes(&outcomes);
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn scene_partition_covers_every_shot_exactly_once() {
        let outcomes = vec![
            outcome(shot(0, 0, 30), vec![]),
            outcome(
                shot(1, 30, 60),
                vec![transition_record(TransitionKind::Continuous, 0.7, 0, 1)],
            ),
            outcome(shot(2, 60, 90), vec![transition_record(TransitionKind::Cut, 0.1, 1, 2)]),
        ];
        let scenes = group_scenes(&outcomes);
        let mut seen: Vec<u32> = scenes.iter().flat_map(|s| s.shots.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn caption_over_face_raises_risk() {
        let face = FaceBox { bbox: BoundingBox::new(100, 160, 60, 80), confidence: 0.9 };
        let caption = TextBox {
            bbox: BoundingBox::new(80, 200, 200, 30),
            confidence: 0.8,
            est_glyph_px: 20,
            caption_band: true,
        };
        let records = vec![
            DetectorRecord {
                kind: DetectorKind::Faces,
                payload: DetectorPayload::Faces(FacesPayload { faces: vec![face] }),
                provenance: Provenance::stub("facescan", "1.1.0"),
            },
            DetectorRecord {
                kind: DetectorKind::Text,
                payload: DetectorPayload::Text(TextPayload { regions: vec![caption] }),
                provenance: Provenance::stub("textspot", "0.9.3"),
            },
        ];
        let run = run_with(vec![outcome(shot(0, 0, 30), records)]);
        let risks = synthesize_risks(&run);
        assert!(risks.iter().any(|r| r.kind == RiskKind::CaptionFaceOverlap));
    }

    #[test]
    fn clipping_and_low_clarity_raise_audio_risks() {
        let audio = AudioPayload {
            true_peak_dbtp: -0.2,
            clarity: Some(0.5),
            ..Default::default()
        };
        let records = vec![DetectorRecord {
            kind: DetectorKind::Audio,
            payload: DetectorPayload::Audio(audio),
            provenance: Provenance::stub("audio-meter", "2.3.0"),
        }];
        let run = run_with(vec![outcome(shot(0, 0, 30), records)]);
        let risks = synthesize_risks(&run);
        assert!(risks.iter().any(|r| r.kind == RiskKind::AudioClipping));
        assert!(risks
            .iter()
            .any(|r| r.kind == RiskKind::LowDialogueIntelligibility && r.severity == Severity::High));
    }

    #[test]
    fn provenance_dedup_preserves_first_appearance_order() {
        let a = Provenance::new("yolo-coarse", "0.4.2", None, "aaaa");
        let b = Provenance::new("facescan", "1.1.0", None, "bbbb");
        let records0 = vec![
            DetectorRecord {
                kind: DetectorKind::ObjectsCoarse,
                payload: DetectorPayload::Empty,
                provenance: a.clone(),
            },
            DetectorRecord {
                kind: DetectorKind::Faces,
                payload: DetectorPayload::Empty,
                provenance: b.clone(),
            },
        ];
        let records1 = vec![DetectorRecord {
            kind: DetectorKind::ObjectsCoarse,
            payload: DetectorPayload::Empty,
            provenance: a.clone(),
        }];
        let outcomes =
            vec![outcome(shot(0, 0, 30), records0), outcome(shot(1, 30, 60), records1)];
        let list = dedup_provenance(&outcomes);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].tool, "yolo-coarse");
        assert_eq!(list[1].tool, "facescan");
    }

    #[test]
    fn tracks_link_same_class_across_adjacent_shots() {
        let make_objects = |x: u32| {
            DetectorRecord {
                kind: DetectorKind::ObjectsCoarse,
                payload: DetectorPayload::Objects(ObjectsPayload {
                    boxes: vec![ObjectBox {
                        bbox: BoundingBox::new(x, 100, 80, 80),
                        class: "subject".into(),
                        confidence: 0.9,
                        pass: DetectionPass::Coarse,
                    }],
                    frame_w: 640,
                    frame_h: 360,
                    tiles_analyzed: 1,
                }),
                provenance: Provenance::stub("yolo-coarse", "0.4.2"),
            }
        };
        let outcomes = vec![
            outcome(shot(0, 0, 30), vec![make_objects(100)]),
            outcome(shot(1, 30, 60), vec![make_objects(110)]),
            outcome(shot(2, 60, 90), vec![make_objects(120)]),
        ];
        let tracks = link_tracks(&outcomes);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].first_shot, 0);
        assert_eq!(tracks[0].last_shot, 2);
        assert_eq!(tracks[0].observations, 3);
    }
}
