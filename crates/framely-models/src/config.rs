//! Analysis configuration shared by the api and the worker.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageThresholds;

/// Per-request ablation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AblationFlags {
    /// Disable super-resolution and its dependent fine-object pass.
    #[serde(default)]
    pub no_sr: bool,
    /// Reduce the tile pass to a single full-frame placement.
    #[serde(default)]
    pub no_tiling: bool,
    /// Skip speech-clarity scoring, keep loudness metrics.
    #[serde(default)]
    pub light_audio: bool,
}

/// Tiled object-pass geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TileConfig {
    pub size: u32,
    pub stride: u32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self { size: 512, stride: 256 }
    }
}

/// Super-resolution trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SuperResConfig {
    pub enabled: bool,
    /// Upscale frames whose height is below this.
    pub trigger_min_h: u32,
}

impl Default for SuperResConfig {
    fn default() -> Self {
        Self { enabled: true, trigger_min_h: 480 }
    }
}

/// Loudness targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoudnessConfig {
    pub target_lufs: f64,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self { target_lufs: -14.0 }
    }
}

/// Speech clarity scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoiConfig {
    pub enabled: bool,
    /// Scores below this raise a `low_dialogue_intelligibility` risk.
    pub min_ok: f64,
}

impl Default for StoiConfig {
    fn default() -> Self {
        Self { enabled: true, min_ok: 0.8 }
    }
}

/// One capability-reducing step of the OOM fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LadderStep {
    DisableMaskRefinement,
    DisableSuperResolution,
    ShrinkVlContext,
    SingleScaleTiling,
    SkipOffender,
}

impl LadderStep {
    /// Reason string recorded in `status.reasons` when the step fires.
    pub fn reason(&self) -> &'static str {
        match self {
            LadderStep::DisableMaskRefinement => "mask_refinement_disabled",
            LadderStep::DisableSuperResolution => "super_resolution_disabled",
            LadderStep::ShrinkVlContext => "vl_context_shrunk",
            LadderStep::SingleScaleTiling => "tiling_single_scale",
            LadderStep::SkipOffender => "detector_skipped",
        }
    }

    /// The default ladder order.
    pub fn default_order() -> Vec<LadderStep> {
        vec![
            LadderStep::DisableMaskRefinement,
            LadderStep::DisableSuperResolution,
            LadderStep::ShrinkVlContext,
            LadderStep::SingleScaleTiling,
            LadderStep::SkipOffender,
        ]
    }

    /// Parse a comma-separated step list, e.g.
    /// `disable_mask_refinement,shrink_vl_context,skip_offender`.
    /// Unknown names are rejected so a typo cannot silently drop a step.
    pub fn parse_order(raw: &str) -> Option<Vec<LadderStep>> {
        raw.split(',')
            .map(|name| match name.trim() {
                "disable_mask_refinement" => Some(LadderStep::DisableMaskRefinement),
                "disable_super_resolution" => Some(LadderStep::DisableSuperResolution),
                "shrink_vl_context" => Some(LadderStep::ShrinkVlContext),
                "single_scale_tiling" => Some(LadderStep::SingleScaleTiling),
                "skip_offender" => Some(LadderStep::SkipOffender),
                _ => None,
            })
            .collect()
    }
}

/// Analysis configuration for one job.
///
/// Defaults guarantee full spatial and temporal coverage; ablations and the
/// fallback ladder only ever reduce work from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisConfig {
    pub tile: TileConfig,
    pub superres: SuperResConfig,
    /// Smallest object side the tiled pass must resolve, in pixels.
    pub small_object_min_px: u32,
    pub loudness: LoudnessConfig,
    pub stoi: StoiConfig,
    /// Analyze every n-th frame; 1 for the full temporal guarantee.
    pub frame_stride: u32,
    /// GPU pool capacity.
    pub gpu_semaphore: usize,
    /// Max frames handed to the VL reasoner per shot.
    pub qwen_context_max_frames: u32,
    /// Ladder step order applied on transient-resource faults.
    pub oom_fallback_order: Vec<LadderStep>,
    #[serde(default)]
    pub ablations: AblationFlags,
    pub thresholds: CoverageThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tile: TileConfig::default(),
            superres: SuperResConfig::default(),
            small_object_min_px: 8,
            loudness: LoudnessConfig::default(),
            stoi: StoiConfig::default(),
            frame_stride: 1,
            gpu_semaphore: 2,
            qwen_context_max_frames: 16,
            oom_fallback_order: LadderStep::default_order(),
            ablations: AblationFlags::default(),
            thresholds: CoverageThresholds::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl AnalysisConfig {
    /// Build the process-wide defaults from environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            tile: TileConfig {
                size: env_parse("TILE_SIZE", base.tile.size),
                stride: env_parse("TILE_STRIDE", base.tile.stride),
            },
            superres: SuperResConfig {
                enabled: env_parse("SUPERRES_ENABLED", base.superres.enabled),
                trigger_min_h: env_parse("SUPERRES_TRIGGER_MIN_H", base.superres.trigger_min_h),
            },
            small_object_min_px: env_parse("SMALL_OBJECT_MIN_PX", base.small_object_min_px),
            loudness: LoudnessConfig {
                target_lufs: env_parse("LOUDNESS_TARGET_LUFS", base.loudness.target_lufs),
            },
            stoi: StoiConfig {
                enabled: env_parse("STOI_ENABLED", base.stoi.enabled),
                min_ok: env_parse("STOI_MIN_OK", base.stoi.min_ok),
            },
            frame_stride: env_parse("FRAME_STRIDE", base.frame_stride).max(1),
            gpu_semaphore: env_parse("GPU_SEMAPHORE", base.gpu_semaphore).max(1),
            qwen_context_max_frames: env_parse(
                "QWEN_CONTEXT_MAX_FRAMES",
                base.qwen_context_max_frames,
            ),
            oom_fallback_order: std::env::var("OOM_FALLBACK_ORDER")
                .ok()
                .and_then(|raw| LadderStep::parse_order(&raw))
                .unwrap_or(base.oom_fallback_order),
            ablations: AblationFlags::default(),
            thresholds: CoverageThresholds {
                frames_analyzed_pct: env_parse(
                    "COVERAGE_FRAMES_ANALYZED_PCT",
                    base.thresholds.frames_analyzed_pct,
                ),
                lufs_trace_pct: env_parse("COVERAGE_LUFS_TRACE_PCT", base.thresholds.lufs_trace_pct),
                stoi_pct: env_parse("COVERAGE_STOI_PCT", base.thresholds.stoi_pct),
                min_detectable_px: base.thresholds.min_detectable_px,
            },
        }
    }

    /// Apply per-job ablation flags on top of the process defaults.
    pub fn with_ablations(mut self, ablations: AblationFlags) -> Self {
        if ablations.no_sr {
            self.superres.enabled = false;
        }
        self.ablations = ablations;
        self
    }

    /// Params slice for a given detector tool, used for fingerprinting.
    pub fn params_slice(&self, tool: &str) -> serde_json::Value {
        match tool {
            "yolo-coarse" | "yolo-fine" => serde_json::json!({
                "small_object_min_px": self.small_object_min_px,
            }),
            "yolo-tiled" => serde_json::json!({
                "tile_size": self.tile.size,
                "stride": self.tile.stride,
                "no_tiling": self.ablations.no_tiling,
            }),
            "realesrgan" => serde_json::json!({
                "enabled": self.superres.enabled,
                "trigger_min_h": self.superres.trigger_min_h,
            }),
            "audio-meter" => serde_json::json!({
                "target_lufs": self.loudness.target_lufs,
                "stoi_enabled": self.stoi.enabled && !self.ablations.light_audio,
            }),
            "vl-reasoner" => serde_json::json!({
                "context_max_frames": self.qwen_context_max_frames,
            }),
            _ => serde_json::json!({ "frame_stride": self.frame_stride }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_has_five_steps_in_order() {
        let order = LadderStep::default_order();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], LadderStep::DisableMaskRefinement);
        assert_eq!(order[4], LadderStep::SkipOffender);
    }

    #[test]
    fn no_sr_ablation_disables_superres() {
        let cfg = AnalysisConfig::default()
            .with_ablations(AblationFlags { no_sr: true, ..Default::default() });
        assert!(!cfg.superres.enabled);
        assert!(cfg.ablations.no_sr);
    }

    #[test]
    fn params_slice_varies_by_tool() {
        let cfg = AnalysisConfig::default();
        assert_ne!(cfg.params_slice("yolo-tiled"), cfg.params_slice("yolo-coarse"));
    }

    #[test]
    fn ladder_order_parses_and_rejects_typos() {
        let order = LadderStep::parse_order("disable_mask_refinement, skip_offender").unwrap();
        assert_eq!(order, vec![LadderStep::DisableMaskRefinement, LadderStep::SkipOffender]);
        assert!(LadderStep::parse_order("disable_everything").is_none());
    }
}
