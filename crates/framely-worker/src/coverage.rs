//! Coverage computation over a finished job run.

use framely_media::{coverage_fraction, tile_grid, VideoInfo};
use framely_models::{
    AnalysisConfig, AudioCoverage, CoverageReport, DetectorKind, DetectorPayload, SpatialCoverage,
    TemporalCoverage,
};

use crate::scheduler::JobRun;

/// Derive the coverage report from detector outputs actually executed.
///
/// Skipped detectors reduce the metric; nothing is forged from config
/// alone.
pub fn compute_coverage(run: &JobRun, info: &VideoInfo) -> CoverageReport {
    let cfg = &run.effective_cfg;
    let total_shots = run.shot_outcomes.len().max(1);

    CoverageReport {
        spatial: spatial_coverage(run, info, cfg, total_shots),
        temporal: temporal_coverage(run, info, cfg),
        audio: audio_coverage(run, cfg),
    }
}

fn spatial_coverage(
    run: &JobRun,
    info: &VideoInfo,
    cfg: &AnalysisConfig,
    total_shots: usize,
) -> SpatialCoverage {
    // Union of tile placements for the geometry the job actually ran.
    let tiles = if cfg.ablations.no_tiling {
        tile_grid(info.width, info.height, info.width.max(info.height), info.width.max(info.height))
    } else {
        tile_grid(info.width, info.height, cfg.tile.size, cfg.tile.stride)
    };
    let union_fraction = coverage_fraction(info.width, info.height, &tiles);

    // A shot only counts as covered when an object pass actually ran.
    let covered_shots = run
        .shot_outcomes
        .iter()
        .filter(|o| {
            o.records.iter().any(|r| {
                matches!(r.payload, DetectorPayload::Objects(_)) && !r.is_skipped()
            })
        })
        .count();

    // Multi-scale tiling resolves the configured minimum; a single-scale
    // pass over a larger frame loses that factor.
    let scale_penalty = if cfg.ablations.no_tiling {
        (info.width.max(info.height)).div_ceil(cfg.tile.size).max(1)
    } else {
        1
    };

    SpatialCoverage {
        tile_size: cfg.tile.size,
        stride: cfg.tile.stride,
        sr_used: run.shot_outcomes.iter().any(|o| o.sr_used),
        pixels_covered_pct: 100.0 * union_fraction * covered_shots as f64 / total_shots as f64,
        min_detectable_px: cfg.small_object_min_px * scale_penalty,
    }
}

fn temporal_coverage(run: &JobRun, info: &VideoInfo, cfg: &AnalysisConfig) -> TemporalCoverage {
    let analyzed: u64 = run.shot_outcomes.iter().map(|o| o.shot.frame_paths.len() as u64).sum();
    let total = info.total_frames.max(1);
    TemporalCoverage {
        frame_stride: cfg.frame_stride,
        frames_analyzed_pct: (100.0 * analyzed as f64 / total as f64).min(100.0),
    }
}

fn audio_coverage(run: &JobRun, cfg: &AnalysisConfig) -> AudioCoverage {
    let mut total_dur = 0.0f64;
    let mut traced_dur = 0.0f64;
    let mut speech_dur = 0.0f64;
    let mut scored_speech_dur = 0.0f64;

    for outcome in &run.shot_outcomes {
        let dur = outcome.shot.audio_window.duration_s();
        total_dur += dur;
        let Some(record) = outcome.record(DetectorKind::Audio) else {
            continue;
        };
        if let DetectorPayload::Audio(audio) = &record.payload {
            traced_dur += dur * audio.lufs_trace;
            let spans: f64 = audio.speech_spans.iter().map(|s| s.duration_s()).sum();
            speech_dur += spans;
            if audio.clarity.is_some() {
                scored_speech_dur += spans;
            }
        }
    }

    let lufs_trace_pct =
        if total_dur > 0.0 { 100.0 * traced_dur / total_dur } else { 100.0 };

    let stoi_enabled = cfg.stoi.enabled && !cfg.ablations.light_audio;
    let stoi_pct = if !stoi_enabled || speech_dur <= 0.0 {
        // 100% by convention over zero speech (and when scoring is off,
        // with the reason recorded in the bundle status).
        100.0
    } else {
        100.0 * scored_speech_dur / speech_dur
    };

    AudioCoverage { lufs_trace_pct, stoi_pct }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framely_models::{
        AudioPayload, DetectorRecord, ObjectsPayload, Provenance, Shot, SpeechSpan,
    };
    use crate::scheduler::ShotOutcome;

    fn info() -> VideoInfo {
        VideoInfo {
            duration_s: 4.0,
            fps: 30.0,
            width: 640,
            height: 360,
            total_frames: 120,
            has_audio: true,
        }
    }

    fn shot(id: u32, start: u64, end: u64) -> Shot {
        Shot {
            shot_id: id,
            start_frame: start,
            end_frame: end,
            frame_count: end - start,
            duration_s: (end - start) as f64 / 30.0,
            frame_paths: (start..end)
                .map(|i| std::path::PathBuf::from(format!("frame_{i:08}.jpg")))
                .collect(),
            audio_window: framely_models::AudioWindow {
                start_s: start as f64 / 30.0,
                end_s: end as f64 / 30.0,
            },
        }
    }

    fn objects_record(skipped: bool) -> DetectorRecord {
        let provenance = Provenance::stub("yolo-tiled", "0.4.2");
        if skipped {
            DetectorRecord::skipped(DetectorKind::ObjectsTiled, provenance, "resource_exhausted")
        } else {
            DetectorRecord {
                kind: DetectorKind::ObjectsTiled,
                payload: DetectorPayload::Objects(ObjectsPayload {
                    frame_w: 640,
                    frame_h: 360,
                    tiles_analyzed: 2,
                    ..Default::default()
                }),
                provenance,
            }
        }
    }

    fn audio_record(trace: f64, spans: Vec<SpeechSpan>, clarity: Option<f64>) -> DetectorRecord {
        DetectorRecord {
            kind: DetectorKind::Audio,
            payload: DetectorPayload::Audio(AudioPayload {
                lufs_trace: trace,
                speech_spans: spans,
                clarity,
                ..Default::default()
            }),
            provenance: Provenance::stub("audio-meter", "2.3.0"),
        }
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
    fn full_run_reports_full_coverage() {
        let outcomes = vec![
            ShotOutcome {
                shot: shot(0, 0, 60),
                records: vec![
                    objects_record(false),
                    audio_record(1.0, vec![SpeechSpan { start_s: 0.0, end_s: 1.0 }], Some(0.9)),
                ],
                sr_used: false,
            },
            ShotOutcome {
                shot: shot(1, 60, 120),
                records: vec![objects_record(false), audio_record(1.0, vec![], None)],
                sr_used: false,
            },
        ];
        let report = compute_coverage(&run_with(outcomes), &info());
        assert_eq!(report.temporal.frames_analyzed_pct, 100.0);
        assert_eq!(report.spatial.pixels_covered_pct, 100.0);
        assert_eq!(report.audio.lufs_trace_pct, 100.0);
        assert_eq!(report.audio.stoi_pct, 100.0);
        assert_eq!(report.spatial.min_detectable_px, 8);
    }

    #[test]
    fn skipped_objects_reduce_spatial_coverage() {
        let outcomes = vec![
            ShotOutcome {
                shot: shot(0, 0, 60),
                records: vec![objects_record(false)],
                sr_used: false,
            },
            ShotOutcome {
                shot: shot(1, 60, 120),
                records: vec![objects_record(true)],
                sr_used: false,
            },
        ];
        let report = compute_coverage(&run_with(outcomes), &info());
        assert_eq!(report.spatial.pixels_covered_pct, 50.0);
    }

    #[test]
    fn unscored_speech_reduces_stoi_coverage() {
        let outcomes = vec![
            ShotOutcome {
                shot: shot(0, 0, 60),
                records: vec![audio_record(
                    1.0,
                    vec![SpeechSpan { start_s: 0.0, end_s: 1.0 }],
                    Some(0.9),
                )],
                sr_used: false,
            },
            ShotOutcome {
                shot: shot(1, 60, 120),
                records: vec![audio_record(
                    1.0,
                    vec![SpeechSpan { start_s: 2.0, end_s: 5.0 }],
                    None,
                )],
                sr_used: false,
            },
        ];
        let report = compute_coverage(&run_with(outcomes), &info());
        assert_eq!(report.audio.stoi_pct, 25.0);
    }

    #[test]
    fn silent_video_reports_full_stoi_by_convention() {
        let outcomes = vec![ShotOutcome {
            shot: shot(0, 0, 120),
            records: vec![audio_record(1.0, vec![], None)],
            sr_used: false,
        }];
        let report = compute_coverage(&run_with(outcomes), &info());
        assert_eq!(report.audio.stoi_pct, 100.0);
        assert_eq!(report.audio.lufs_trace_pct, 100.0);
    }

    #[test]
    fn single_scale_tiling_raises_min_detectable() {
        let outcomes = vec![ShotOutcome {
            shot: shot(0, 0, 120),
            records: vec![objects_record(false)],
            sr_used: false,
        }];
        let mut run = run_with(outcomes);
        run.effective_cfg.ablations.no_tiling = true;
        let report = compute_coverage(&run, &info());
        // 640 / 512 rounds up to 2.
        assert_eq!(report.spatial.min_detectable_px, 16);
        assert_eq!(report.spatial.pixels_covered_pct, 100.0);
    }
}
