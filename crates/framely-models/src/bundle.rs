//! The Video Analysis Bundle (VAB): the single document this system emits.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coverage::CoverageReport;
use crate::detector::{
    AudioPayload, ColorPayload, FacesPayload, MasksPayload, MotionPayload, ObjectsPayload,
    TextPayload, TransitionPayload,
};
use crate::provenance::Provenance;
use crate::risk::Risk;
use crate::scene::Scene;

/// Bundle schema version. Evolution bumps this and ships a migration note.
pub const SCHEMA_VERSION: &str = "1.1.0";

/// Final bundle state after the coverage gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Ok,
    Degraded,
    Failed,
}

/// Bundle status: gate verdict, reasons, and the coverage report.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VabStatus {
    pub state: StatusState,
    /// Every ladder step fired and every skipped detector, with reasons.
    pub reasons: Vec<String>,
    pub coverage: CoverageReport,
}

/// Stage latencies and resource counters for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunMetrics {
    /// Wall-clock per stage, `stage -> ms`.
    pub latency_ms: BTreeMap<String, u64>,
    pub gpu_mem_mb_peak: u64,
    pub retries: u32,
    pub oom_trips: u32,
}

/// Video identity and run metrics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoMeta {
    pub video_id: String,
    pub path: String,
    pub sha256: String,
    pub metrics: RunMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub w: u32,
    pub h: u32,
}

/// Object-class histogram and region counts over the whole video.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DetectionCounts {
    pub objects_by_class: BTreeMap<String, u64>,
    pub faces: u64,
    pub text_regions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GlobalStats {
    pub total_frames: u64,
    pub duration_s: f64,
    pub fps: f64,
    pub resolution: Resolution,
    pub detections: DetectionCounts,
}

/// Per-shot detector outputs, one slot per enabled kind.
///
/// `None` means the detector was disabled by ablation or fallback; the
/// reason lives in `status.reasons` and in the matching provenance entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ShotDetectors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<ObjectsPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masks: Option<MasksPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces: Option<FacesPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionPayload>,
    pub sr_used: bool,
}

/// One shot as persisted in the bundle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShotEntry {
    pub shot_id: u32,
    pub start_frame: u64,
    pub end_frame: u64,
    pub frame_count: u64,
    pub duration_s: f64,
    pub detectors: ShotDetectors,
    pub summary: String,
    pub mood: String,
    pub intent: String,
    pub composition_notes: Vec<String>,
    pub transition_guess: String,
}

/// An object track linked across consecutive shots.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Track {
    pub track_id: u32,
    pub class: String,
    pub first_shot: u32,
    pub last_shot: u32,
    pub observations: u32,
}

/// Expected operating point for a detector family.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Calibration {
    pub family: String,
    pub expected_tpr: f64,
    pub expected_fpr: f64,
}

/// The Video Analysis Bundle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Vab {
    pub schema_version: String,
    pub status: VabStatus,
    pub video: VideoMeta,
    pub global: GlobalStats,
    pub scenes: Vec<Scene>,
    pub shots: Vec<ShotEntry>,
    pub tracks: Vec<Track>,
    pub risks: Vec<Risk>,
    pub provenance: Vec<Provenance>,
    pub calibration: Vec<Calibration>,
}

/// Structural defects found by [`Vab::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleInvalid {
    #[error("schema_version {0:?} does not match {SCHEMA_VERSION:?}")]
    SchemaVersion(String),
    #[error("shots do not tile [0, {total}) without gaps or overlap at shot {shot_id}")]
    ShotPartition { shot_id: u32, total: u64 },
    #[error("shot {0} belongs to {1} scenes")]
    SceneMembership(u32, usize),
    #[error("duplicate provenance entry for ({tool}, {version}, {params_hash})")]
    DuplicateProvenance { tool: String, version: String, params_hash: String },
}

impl Vab {
    /// Validate structural invariants before the bundle is persisted.
    ///
    /// Checks the schema version, the gap-free shot partition, the
    /// shots-in-exactly-one-scene law, and provenance uniqueness.
    pub fn validate(&self) -> Result<(), BundleInvalid> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(BundleInvalid::SchemaVersion(self.schema_version.clone()));
        }

        let mut expected_start = 0u64;
        for shot in &self.shots {
            if shot.start_frame != expected_start {
                return Err(BundleInvalid::ShotPartition {
                    shot_id: shot.shot_id,
                    total: self.global.total_frames,
                });
            }
            expected_start = shot.end_frame;
        }
        if !self.shots.is_empty() && expected_start != self.global.total_frames {
            return Err(BundleInvalid::ShotPartition {
                shot_id: self.shots.last().map(|s| s.shot_id).unwrap_or(0),
                total: self.global.total_frames,
            });
        }

        let mut membership: BTreeMap<u32, usize> = BTreeMap::new();
        for scene in &self.scenes {
            for shot_id in &scene.shots {
                *membership.entry(*shot_id).or_default() += 1;
            }
        }
        for shot in &self.shots {
            let count = membership.get(&shot.shot_id).copied().unwrap_or(0);
            if count != 1 {
                return Err(BundleInvalid::SceneMembership(shot.shot_id, count));
            }
        }
        if membership.len() != self.shots.len() {
            if let Some((&shot_id, &count)) = membership
                .iter()
                .find(|(id, _)| !self.shots.iter().any(|s| s.shot_id == **id))
            {
                return Err(BundleInvalid::SceneMembership(shot_id, count));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for entry in &self.provenance {
            if !seen.insert(entry.dedup_key()) {
                return Err(BundleInvalid::DuplicateProvenance {
                    tool: entry.tool.clone(),
                    version: entry.version.clone(),
                    params_hash: entry.params_hash.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{AudioCoverage, SpatialCoverage, TemporalCoverage};

    fn shot_entry(shot_id: u32, start: u64, end: u64) -> ShotEntry {
        ShotEntry {
            shot_id,
            start_frame: start,
            end_frame: end,
            frame_count: end - start,
            duration_s: (end - start) as f64 / 30.0,
            detectors: ShotDetectors::default(),
            summary: String::new(),
            mood: String::new(),
            intent: String::new(),
            composition_notes: Vec::new(),
            transition_guess: String::new(),
        }
    }

    fn minimal_bundle() -> Vab {
        Vab {
            schema_version: SCHEMA_VERSION.to_string(),
            status: VabStatus {
                state: StatusState::Ok,
                reasons: Vec::new(),
                coverage: CoverageReport {
                    spatial: SpatialCoverage {
                        tile_size: 512,
                        stride: 256,
                        sr_used: false,
                        pixels_covered_pct: 100.0,
                        min_detectable_px: 8,
                    },
                    temporal: TemporalCoverage { frame_stride: 1, frames_analyzed_pct: 100.0 },
                    audio: AudioCoverage { lufs_trace_pct: 100.0, stoi_pct: 100.0 },
                },
            },
            video: VideoMeta {
                video_id: "t1".into(),
                path: "store/t1/video.mp4".into(),
                sha256: "0".repeat(64),
                metrics: RunMetrics::default(),
            },
            global: GlobalStats {
                total_frames: 60,
                duration_s: 2.0,
                fps: 30.0,
                resolution: Resolution { w: 640, h: 360 },
                detections: DetectionCounts::default(),
            },
            scenes: vec![Scene {
                scene_id: 0,
                shots: vec![0, 1],
                start_frame: 0,
                end_frame: 60,
                features: Default::default(),
                narrative: None,
            }],
            shots: vec![shot_entry(0, 0, 30), shot_entry(1, 30, 60)],
            tracks: Vec::new(),
            risks: Vec::new(),
            provenance: Vec::new(),
            calibration: Vec::new(),
        }
    }

    #[test]
    fn valid_bundle_passes() {
        assert_eq!(minimal_bundle().validate(), Ok(()));
    }

    #[test]
    fn gap_in_shot_partition_is_rejected() {
        let mut vab = minimal_bundle();
        vab.shots[1].start_frame = 31;
        assert!(matches!(vab.validate(), Err(BundleInvalid::ShotPartition { .. })));
    }

    #[test]
    fn shot_in_two_scenes_is_rejected() {
        let mut vab = minimal_bundle();
        vab.scenes.push(Scene {
            scene_id: 1,
            shots: vec![1],
            start_frame: 30,
            end_frame: 60,
            features: Default::default(),
            narrative: None,
        });
        assert_eq!(vab.validate(), Err(BundleInvalid::SceneMembership(1, 2)));
    }

    #[test]
    fn duplicate_provenance_is_rejected() {
        let mut vab = minimal_bundle();
        let entry = Provenance::new("yolo-coarse", "1.0", None, "abcd");
        vab.provenance.push(entry.clone());
        vab.provenance.push(entry);
        assert!(matches!(vab.validate(), Err(BundleInvalid::DuplicateProvenance { .. })));
    }
}
