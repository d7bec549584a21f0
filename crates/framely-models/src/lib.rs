//! Shared data models for the Framely analysis backend.
//!
//! This crate provides Serde-serializable types for:
//! - Analysis jobs and their lifecycle states
//! - Shots, scenes and the audio windows they own
//! - Detector kinds, payloads, resource classes and faults
//! - Provenance entries and stable parameter fingerprints
//! - Coverage accounting and quality-gate thresholds
//! - Risk flags synthesized from detector metrics
//! - The Video Analysis Bundle (VAB) persisted per video
//! - The analysis configuration shared by api and worker

pub mod bundle;
pub mod config;
pub mod coverage;
pub mod detector;
pub mod job;
pub mod provenance;
pub mod risk;
pub mod scene;
pub mod shot;

// Re-export common types
pub use bundle::{
    Calibration, DetectionCounts, GlobalStats, Resolution, RunMetrics, ShotDetectors, ShotEntry,
    StatusState, Track, Vab, VabStatus, VideoMeta, SCHEMA_VERSION,
};
pub use config::{
    AblationFlags, AnalysisConfig, LadderStep, LoudnessConfig, StoiConfig, SuperResConfig,
    TileConfig,
};
pub use coverage::{AudioCoverage, CoverageReport, CoverageThresholds, SpatialCoverage, TemporalCoverage};
pub use detector::{
    AudioPayload, BoundingBox, ColorPayload, DetectionPass, DetectorFault, DetectorKind,
    DetectorPayload, DetectorRecord, FaceBox, FacesPayload, MaskStat, MasksPayload, MotionPayload,
    ObjectBox, ObjectsPayload, ReasoningPayload, ResourceClass, SaliencyStats, SpeechSpan,
    SrPayload, TextBox, TextPayload, TransitionKind, TransitionPayload,
};
pub use job::{JobId, JobSource, JobState, VideoId, VideoIdError, VideoJob};
pub use provenance::{params_fingerprint, Provenance};
pub use risk::{Risk, RiskKind, Severity};
pub use scene::{Scene, SceneFeatures, SceneNarrative};
pub use shot::{AudioWindow, Shot};
