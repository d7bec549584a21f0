//! Scene model: visually coherent groups of shots.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Aggregate features over a scene's shots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneFeatures {
    /// Dominant colors pooled over member shots, `#rrggbb`.
    pub dominant_colors: Vec<String>,
    pub mean_motion: f32,
    pub mean_brightness: f32,
    /// Mean integrated loudness over member shots, LUFS.
    pub mean_lufs: f64,
    pub face_count: u64,
    pub object_count: u64,
}

/// Scene-level narrative synthesized from member-shot reasoning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneNarrative {
    pub summary: String,
    pub mood: String,
}

/// A group of visually/temporally coherent shots.
///
/// Scenes own shot ids, never shot objects; cross-references stay id-based.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub scene_id: u32,
    /// Member shots in temporal order.
    pub shots: Vec<u32>,
    pub start_frame: u64,
    pub end_frame: u64,
    pub features: SceneFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<SceneNarrative>,
}
