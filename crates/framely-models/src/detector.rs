//! Detector kinds, payload schemas and fault taxonomy.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provenance::Provenance;

/// The closed set of detector kinds the scheduler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    ObjectsCoarse,
    ObjectsTiled,
    SuperResolution,
    ObjectsFine,
    MaskRefinement,
    Faces,
    Text,
    Color,
    Motion,
    Audio,
    Transition,
    Reasoning,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::ObjectsCoarse => "objects_coarse",
            DetectorKind::ObjectsTiled => "objects_tiled",
            DetectorKind::SuperResolution => "super_resolution",
            DetectorKind::ObjectsFine => "objects_fine",
            DetectorKind::MaskRefinement => "mask_refinement",
            DetectorKind::Faces => "faces",
            DetectorKind::Text => "text",
            DetectorKind::Color => "color",
            DetectorKind::Motion => "motion",
            DetectorKind::Audio => "audio",
            DetectorKind::Transition => "transition",
            DetectorKind::Reasoning => "reasoning",
        }
    }

    /// Phase A chain, in execution order.
    pub const PHASE_A: [DetectorKind; 5] = [
        DetectorKind::ObjectsCoarse,
        DetectorKind::ObjectsTiled,
        DetectorKind::SuperResolution,
        DetectorKind::ObjectsFine,
        DetectorKind::MaskRefinement,
    ];

    /// Phase B fan-out set.
    pub const PHASE_B: [DetectorKind; 6] = [
        DetectorKind::Faces,
        DetectorKind::Text,
        DetectorKind::Color,
        DetectorKind::Motion,
        DetectorKind::Audio,
        DetectorKind::Transition,
    ];
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission class for the GPU pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    GpuHeavy,
    GpuLight,
    Cpu,
    Io,
}

impl ResourceClass {
    /// Whether this class must acquire a pool permit before running.
    pub fn needs_gpu_permit(&self) -> bool {
        matches!(self, ResourceClass::GpuHeavy | ResourceClass::GpuLight)
    }
}

/// Detector fault taxonomy.
///
/// Only `TransientResource` is eligible for the fallback ladder; the other
/// variants are surfaced immediately at the detector boundary.
#[derive(Debug, Clone, Error)]
pub enum DetectorFault {
    #[error("transient resource exhaustion: {0}")]
    TransientResource(String),
    #[error("input defect: {0}")]
    InputDefect(String),
    #[error("internal detector fault: {0}")]
    Internal(String),
    #[error("external service fault: {0}")]
    External(String),
}

impl DetectorFault {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientResource(msg.into())
    }

    pub fn input_defect(msg: impl Into<String>) -> Self {
        Self::InputDefect(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DetectorFault::TransientResource(_))
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    /// Intersection area with another box.
    pub fn intersection(&self, other: &BoundingBox) -> u64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            0
        } else {
            (x1 - x0) as u64 * (y1 - y0) as u64
        }
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.intersection(other) > 0
    }
}

/// Which object pass produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPass {
    Coarse,
    Tiled,
    Fine,
}

/// A single object detection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObjectBox {
    pub bbox: BoundingBox,
    pub class: String,
    pub confidence: f32,
    pub pass: DetectionPass,
}

/// Object detections for one shot, after cross-pass NMS.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ObjectsPayload {
    pub boxes: Vec<ObjectBox>,
    pub frame_w: u32,
    pub frame_h: u32,
    /// Number of tile placements analyzed (1 for the coarse pass).
    pub tiles_analyzed: u32,
}

/// Super-resolution pass result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SrPayload {
    /// Whether upscaled frames were produced for this shot.
    pub applied: bool,
    pub scale_factor: u32,
    pub frames_upscaled: u32,
}

/// A refined mask statistic for a surviving detection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaskStat {
    pub bbox: BoundingBox,
    /// Fraction of the box area covered by the refined mask.
    pub area_ratio: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MasksPayload {
    pub masks: Vec<MaskStat>,
}

/// A detected face region.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FaceBox {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FacesPayload {
    pub faces: Vec<FaceBox>,
}

/// A detected text region with typography estimates.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextBox {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Estimated glyph height in pixels.
    pub est_glyph_px: u32,
    /// Whether the region sits in the lower-third caption band.
    pub caption_band: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TextPayload {
    pub regions: Vec<TextBox>,
}

/// Color and composition statistics for a shot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ColorPayload {
    /// Dominant colors as `#rrggbb`, most dominant first.
    pub dominant: Vec<String>,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Luminance balance against the rule-of-thirds grid, 0..1.
    pub thirds_balance: f32,
}

/// Saliency summary derived from luminance variance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct SaliencyStats {
    /// Saliency centroid, normalized 0..1.
    pub centroid_x: f32,
    pub centroid_y: f32,
    /// Spatial spread of salient mass, normalized 0..1.
    pub spread: f32,
}

/// Motion and saliency statistics for a shot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MotionPayload {
    /// Mean absolute inter-frame difference, 0..1.
    pub mean_motion: f32,
    pub max_motion: f32,
    pub saliency: SaliencyStats,
}

/// A span of speech-classified audio, in seconds from video start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpeechSpan {
    pub start_s: f64,
    pub end_s: f64,
}

impl SpeechSpan {
    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }
}

/// Audio engineering metrics for a shot's audio window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AudioPayload {
    /// Integrated loudness in LUFS.
    pub lufs_integrated: f64,
    /// Loudness range (LRA) in LU.
    pub loudness_range: f64,
    /// True peak in dBTP.
    pub true_peak_dbtp: f64,
    /// Crest-factor style dynamic range in dB.
    pub dynamic_range_db: f64,
    /// Speech-classified spans inside the shot window.
    pub speech_spans: Vec<SpeechSpan>,
    /// Speech clarity score (STOI-like, 0..1); None when no speech.
    pub clarity: Option<f64>,
    /// Stereo phase correlation, -1..1 (1.0 for mono sources).
    pub stereo_phase: f64,
    /// Fraction of the window with a valid loudness sample, 0..1.
    pub lufs_trace: f64,
}

/// Classified transition between two adjacent shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Cut,
    Fade,
    Dissolve,
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransitionPayload {
    pub kind: TransitionKind,
    /// Structural similarity across the boundary, 0..1.
    pub ssim: f64,
    pub from_shot: u32,
    pub to_shot: u32,
}

/// Per-shot narrative fields produced by the VL reasoner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReasoningPayload {
    pub summary: String,
    pub mood: String,
    pub intent: String,
    #[serde(default)]
    pub composition_notes: Vec<String>,
    #[serde(default)]
    pub transition_guess: String,
}

/// Payload of a detector invocation; schema fixed per detector kind.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorPayload {
    Objects(ObjectsPayload),
    Sr(SrPayload),
    Masks(MasksPayload),
    Faces(FacesPayload),
    Text(TextPayload),
    Color(ColorPayload),
    Motion(MotionPayload),
    Audio(AudioPayload),
    Transition(TransitionPayload),
    Reasoning(ReasoningPayload),
    /// Detector was skipped; the provenance entry carries the reason.
    Empty,
}

/// One detector invocation result attached to a shot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DetectorRecord {
    pub kind: DetectorKind,
    pub payload: DetectorPayload,
    pub provenance: Provenance,
}

impl DetectorRecord {
    /// Build a skipped record: empty payload, provenance stub with reason.
    pub fn skipped(kind: DetectorKind, mut provenance: Provenance, reason: impl Into<String>) -> Self {
        provenance.skipped_reason = Some(reason.into());
        Self { kind, payload: DetectorPayload::Empty, provenance }
    }

    pub fn is_skipped(&self) -> bool {
        self.provenance.skipped_reason.is_some()
    }
}
