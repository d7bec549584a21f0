//! Detector interface and the closed adapter registry.
//!
//! Every capability (object passes, faces, text, color, motion, audio,
//! transitions) implements [`Detector`] and is registered in
//! [`DetectorSet::builtin`] at startup. The scheduler only ever talks to
//! the trait; adding a detector means declaring a new adapter and
//! registering it here.

mod audio;
mod color;
mod faces;
mod masks;
mod motion;
mod nms;
mod objects;
mod superres;
mod text;
mod tiling;
mod transition;
mod vision;

pub use nms::cross_pass_nms;
pub use superres::sr_frame_paths;
pub use tiling::{coverage_fraction, tile_grid, Tile};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use framely_models::{
    params_fingerprint, AnalysisConfig, Calibration, DetectorFault, DetectorKind, DetectorPayload,
    ObjectsPayload, Provenance, ResourceClass, Shot, VideoId,
};

/// Inputs handed to one detector invocation.
///
/// The scheduler rebuilds the context as the Phase A chain progresses:
/// `prior_objects` carries the surviving detections of the previous pass
/// and `sr_frames` the upscaled frames once super-resolution ran.
#[derive(Debug, Clone)]
pub struct DetectorCtx {
    pub video_id: VideoId,
    pub shot: Shot,
    /// Previous shot, present for transition classification.
    pub prev_shot: Option<Shot>,
    /// Extracted audio track; absent for silent sources.
    pub audio_path: Option<PathBuf>,
    /// Job-scoped scratch directory (super-resolution output lands here).
    pub work_dir: PathBuf,
    /// Surviving detections from the previous object pass.
    pub prior_objects: Option<ObjectsPayload>,
    /// Upscaled frames, populated once the super-resolution pass ran.
    pub sr_frames: Vec<PathBuf>,
}

impl DetectorCtx {
    pub fn new(video_id: VideoId, shot: Shot, work_dir: PathBuf) -> Self {
        Self {
            video_id,
            shot,
            prev_shot: None,
            audio_path: None,
            work_dir,
            prior_objects: None,
            sr_frames: Vec::new(),
        }
    }
}

/// A pure analysis capability over one shot.
///
/// Implementations must be deterministic for the same inputs and params
/// (up to floating-point tolerance) and must not have side effects beyond
/// reads from a model cache and writes under `ctx.work_dir`.
#[async_trait]
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;
    fn tool(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn checkpoint(&self) -> Option<&'static str> {
        None
    }
    fn resource_class(&self) -> ResourceClass;

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault>;
}

/// Build the provenance entry for a detector under the given config.
pub fn provenance_for(det: &dyn Detector, cfg: &AnalysisConfig) -> Provenance {
    Provenance::new(
        det.tool(),
        det.version(),
        det.checkpoint().map(String::from),
        params_fingerprint(&cfg.params_slice(det.tool())),
    )
}

/// The closed set of registered detector adapters.
pub struct DetectorSet {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorSet {
    /// Register the built-in adapters.
    pub fn builtin() -> Self {
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(objects::CoarseObjects),
            Arc::new(objects::TiledObjects),
            Arc::new(superres::SuperResolution),
            Arc::new(objects::FineObjects),
            Arc::new(masks::MaskRefinement),
            Arc::new(faces::FaceDetector),
            Arc::new(text::TextDetector),
            Arc::new(color::ColorAnalyzer),
            Arc::new(motion::MotionAnalyzer),
            Arc::new(audio::AudioMeter),
            Arc::new(transition::TransitionClassifier),
        ];
        Self { detectors }
    }

    /// Build a set from explicit adapters.
    ///
    /// Production wiring goes through [`DetectorSet::builtin`]; this exists
    /// for harnesses that substitute faulting or instrumented adapters.
    pub fn with_detectors(detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self { detectors }
    }

    pub fn get(&self, kind: DetectorKind) -> Option<Arc<dyn Detector>> {
        self.detectors.iter().find(|d| d.kind() == kind).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.iter()
    }
}

/// Expected operating points per detector family, shipped in the bundle.
pub fn calibration_table() -> Vec<Calibration> {
    vec![
        Calibration { family: "objects".into(), expected_tpr: 0.86, expected_fpr: 0.04 },
        Calibration { family: "faces".into(), expected_tpr: 0.91, expected_fpr: 0.02 },
        Calibration { family: "text".into(), expected_tpr: 0.88, expected_fpr: 0.05 },
        Calibration { family: "audio".into(), expected_tpr: 0.97, expected_fpr: 0.01 },
        Calibration { family: "transition".into(), expected_tpr: 0.93, expected_fpr: 0.03 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_covers_every_adapter_kind() {
        let set = DetectorSet::builtin();
        for kind in DetectorKind::PHASE_A.iter().chain(DetectorKind::PHASE_B.iter()) {
            assert!(set.get(*kind).is_some(), "missing adapter for {kind}");
        }
        // Reasoning is served over HTTP by the scheduler, not an adapter.
        assert!(set.get(DetectorKind::Reasoning).is_none());
    }

    #[test]
    fn phase_a_adapters_are_gpu_class() {
        let set = DetectorSet::builtin();
        for kind in DetectorKind::PHASE_A {
            let det = set.get(kind).unwrap();
            assert!(det.resource_class().needs_gpu_permit(), "{kind} must use the pool");
        }
    }

    #[test]
    fn provenance_fingerprint_tracks_config() {
        let set = DetectorSet::builtin();
        let det = set.get(DetectorKind::ObjectsTiled).unwrap();
        let a = provenance_for(det.as_ref(), &AnalysisConfig::default());
        let mut cfg = AnalysisConfig::default();
        cfg.tile.size = 256;
        let b = provenance_for(det.as_ref(), &cfg);
        assert_eq!(a.tool, b.tool);
        assert_ne!(a.params_hash, b.params_hash);
    }
}
