//! Mask refinement over surviving detections.

use async_trait::async_trait;

use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, MaskStat, MasksPayload,
    ResourceClass,
};

use super::vision::load_luma;
use super::{Detector, DetectorCtx};

/// Refines each surviving detection to a foreground mask estimate.
///
/// The mask is approximated by thresholding luminance against the box
/// mean; `area_ratio` reports how much of the box the foreground fills.
pub struct MaskRefinement;

#[async_trait]
impl Detector for MaskRefinement {
    fn kind(&self) -> DetectorKind {
        DetectorKind::MaskRefinement
    }

    fn tool(&self) -> &'static str {
        "segrefine"
    }

    fn version(&self) -> &'static str {
        "0.2.1"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("seg-lite")
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::GpuHeavy
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
        let prior = ctx.prior_objects.clone().unwrap_or_default();

        let masks = tokio::task::spawn_blocking(move || -> Result<Vec<MaskStat>, DetectorFault> {
            let img = load_luma(&frame)?;
            let mut masks = Vec::with_capacity(prior.boxes.len());

            for object in &prior.boxes {
                let x1 = object.bbox.right().min(img.width());
                let y1 = object.bbox.bottom().min(img.height());
                if x1 <= object.bbox.x || y1 <= object.bbox.y {
                    continue;
                }

                let mut sum = 0u64;
                let mut n = 0u64;
                for y in object.bbox.y..y1 {
                    for x in object.bbox.x..x1 {
                        sum += img.get_pixel(x, y).0[0] as u64;
                        n += 1;
                    }
                }
                let mean = (sum / n.max(1)) as u8;

                let mut above = 0u64;
                for y in object.bbox.y..y1 {
                    for x in object.bbox.x..x1 {
                        if img.get_pixel(x, y).0[0] > mean {
                            above += 1;
                        }
                    }
                }
                masks.push(MaskStat {
                    bbox: object.bbox,
                    area_ratio: above as f32 / n.max(1) as f32,
                });
            }
            Ok(masks)
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Masks(MasksPayload { masks }))
    }
}
