//! Risk flags synthesized from detector metrics.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Risk categories derived at merge time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    LowDialogueIntelligibility,
    AudioClipping,
    CaptionFaceOverlap,
    DegradedDetection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Med,
    High,
}

/// A risk flag attached to one shot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Risk {
    pub shot_id: u32,
    #[serde(rename = "type")]
    pub kind: RiskKind,
    pub severity: Severity,
    /// Snapshot of the metric that triggered the flag.
    pub metric: Value,
}

impl Risk {
    pub fn new(shot_id: u32, kind: RiskKind, severity: Severity, metric: Value) -> Self {
        Self { shot_id, kind, severity, metric }
    }
}
