//! Face region detection.

use async_trait::async_trait;

use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, FaceBox, FacesPayload,
    ResourceClass,
};

use super::vision::{load_luma, load_rgb, propose_regions, skin_fraction};
use super::{Detector, DetectorCtx};

/// Minimum skin fraction for a region to qualify as a face candidate.
const SKIN_MIN: f32 = 0.35;
/// Face candidates must be roughly upright.
const ASPECT_MIN: f32 = 0.5;
const ASPECT_MAX: f32 = 1.6;

pub struct FaceDetector;

#[async_trait]
impl Detector for FaceDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Faces
    }

    fn tool(&self) -> &'static str {
        "facescan"
    }

    fn version(&self) -> &'static str {
        "1.1.0"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("face-s")
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::GpuLight
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        _cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        let frame = ctx
            .shot
            .anchor_frame()
            .ok_or_else(|| DetectorFault::input_defect("shot has no frames"))?
            .clone();

        let faces = tokio::task::spawn_blocking(move || -> Result<Vec<FaceBox>, DetectorFault> {
            let rgb = load_rgb(&frame)?;
            let luma = load_luma(&frame)?;

            let mut faces = Vec::new();
            for (bbox, contrast_conf) in propose_regions(&luma, 24) {
                let aspect = bbox.w as f32 / bbox.h.max(1) as f32;
                if !(ASPECT_MIN..=ASPECT_MAX).contains(&aspect) {
                    continue;
                }
                let skin = skin_fraction(&rgb, &bbox);
                if skin < SKIN_MIN {
                    continue;
                }
                faces.push(FaceBox {
                    bbox,
                    confidence: (skin * 0.7 + contrast_conf * 0.3).clamp(0.0, 1.0),
                });
            }
            faces.sort_by(|a, b| {
                b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
            });
            Ok(faces)
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Faces(FacesPayload { faces }))
    }
}
