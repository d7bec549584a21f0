//! Object detection passes: coarse, tiled multi-scale, and fine.

use async_trait::async_trait;
use image::GenericImageView;
use rayon::prelude::*;

use framely_models::{
    AnalysisConfig, BoundingBox, DetectionPass, DetectorFault, DetectorKind, DetectorPayload,
    ObjectBox, ObjectsPayload, ResourceClass,
};

use super::nms::cross_pass_nms;
use super::tiling::tile_grid;
use super::vision::{classify_region, load_luma, propose_regions};
use super::{Detector, DetectorCtx};

/// IoU threshold applied across object passes.
const NMS_IOU: f64 = 0.5;
/// Most confident surviving boxes examined by the fine pass.
const FINE_MAX_REGIONS: usize = 16;

/// Coarse full-frame object pass.
pub struct CoarseObjects;

#[async_trait]
impl Detector for CoarseObjects {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ObjectsCoarse
    }

    fn tool(&self) -> &'static str {
        "yolo-coarse"
    }

    fn version(&self) -> &'static str {
        "0.4.2"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("det-base-640")
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::GpuHeavy
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        let frame = ctx
            .shot
            .anchor_frame()
            .ok_or_else(|| DetectorFault::input_defect("shot has no frames"))?
            .clone();
        let min_px = cfg.small_object_min_px;

        let payload = tokio::task::spawn_blocking(move || -> Result<ObjectsPayload, DetectorFault> {
            let img = load_luma(&frame)?;
            let (w, h) = img.dimensions();
            let boxes = propose_regions(&img, min_px.max(16))
                .into_iter()
                .map(|(bbox, confidence)| ObjectBox {
                    class: classify_region(&bbox, w, h).to_string(),
                    bbox,
                    confidence,
                    pass: DetectionPass::Coarse,
                })
                .collect();
            Ok(ObjectsPayload {
                boxes: cross_pass_nms(boxes, NMS_IOU),
                frame_w: w,
                frame_h: h,
                tiles_analyzed: 1,
            })
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Objects(payload))
    }
}

/// Tiled multi-scale object pass.
///
/// Re-examines the anchor frame per tile so small objects near the
/// configured minimum size survive; merges with the coarse survivors
/// through cross-pass NMS. A single full-frame placement is used when
/// tiling is ablated or the ladder reduced the pass to single scale.
pub struct TiledObjects;

#[async_trait]
impl Detector for TiledObjects {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ObjectsTiled
    }

    fn tool(&self) -> &'static str {
        "yolo-tiled"
    }

    fn version(&self) -> &'static str {
        "0.4.2"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("det-base-640")
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::GpuHeavy
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        let frame = ctx
            .shot
            .anchor_frame()
            .ok_or_else(|| DetectorFault::input_defect("shot has no frames"))?
            .clone();
        let prior = ctx.prior_objects.clone().unwrap_or_default();
        let min_px = cfg.small_object_min_px;
        let (tile_size, stride) = (cfg.tile.size, cfg.tile.stride);
        let single_scale = cfg.ablations.no_tiling;

        let payload = tokio::task::spawn_blocking(move || -> Result<ObjectsPayload, DetectorFault> {
            let img = load_luma(&frame)?;
            let (w, h) = img.dimensions();

            let tiles = if single_scale {
                tile_grid(w, h, w.max(h), w.max(h))
            } else {
                tile_grid(w, h, tile_size, stride)
            };

            let mut candidates: Vec<ObjectBox> = tiles
                .par_iter()
                .flat_map_iter(|tile| {
                    let view = img.view(tile.bbox.x, tile.bbox.y, tile.bbox.w, tile.bbox.h);
                    let tile_img = view.to_image();
                    let (tx, ty) = (tile.bbox.x, tile.bbox.y);
                    propose_regions(&tile_img, min_px)
                        .into_iter()
                        .map(move |(bbox, confidence)| ObjectBox {
                            bbox: BoundingBox::new(bbox.x + tx, bbox.y + ty, bbox.w, bbox.h),
                            class: String::new(),
                            confidence,
                            pass: DetectionPass::Tiled,
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
            for candidate in &mut candidates {
                candidate.class = classify_region(&candidate.bbox, w, h).to_string();
            }
            candidates.extend(prior.boxes.iter().cloned());

            Ok(ObjectsPayload {
                boxes: cross_pass_nms(candidates, NMS_IOU),
                frame_w: w,
                frame_h: h,
                tiles_analyzed: tiles.len() as u32,
            })
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Objects(payload))
    }
}

/// Fine object pass over super-resolved regions.
///
/// Only regions surviving coarse+tiled NMS are re-examined, inside the
/// upscaled frames produced by the super-resolution pass.
pub struct FineObjects;

#[async_trait]
impl Detector for FineObjects {
    fn kind(&self) -> DetectorKind {
        DetectorKind::ObjectsFine
    }

    fn tool(&self) -> &'static str {
        "yolo-fine"
    }

    fn version(&self) -> &'static str {
        "0.4.2"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("det-hires-1280")
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::GpuHeavy
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        if ctx.sr_frames.is_empty() {
            return Err(DetectorFault::input_defect("no super-resolved frames"));
        }
        let sr_frame = ctx.sr_frames[ctx.sr_frames.len() / 2].clone();
        let prior = ctx
            .prior_objects
            .clone()
            .ok_or_else(|| DetectorFault::input_defect("no surviving detections"))?;
        let min_px = cfg.small_object_min_px;

        let payload = tokio::task::spawn_blocking(move || -> Result<ObjectsPayload, DetectorFault> {
            let img = load_luma(&sr_frame)?;
            let scale = (img.width() / prior.frame_w.max(1)).max(1);

            let mut ranked = prior.boxes.clone();
            ranked.sort_by(|a, b| {
                b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut candidates: Vec<ObjectBox> = Vec::new();
            for region in ranked.iter().take(FINE_MAX_REGIONS) {
                let up = BoundingBox::new(
                    region.bbox.x * scale,
                    region.bbox.y * scale,
                    (region.bbox.w * scale).min(img.width().saturating_sub(region.bbox.x * scale)),
                    (region.bbox.h * scale).min(img.height().saturating_sub(region.bbox.y * scale)),
                );
                if up.w == 0 || up.h == 0 {
                    continue;
                }
                let crop = img.view(up.x, up.y, up.w, up.h).to_image();
                for (bbox, confidence) in propose_regions(&crop, min_px) {
                    let mapped = BoundingBox::new(
                        (up.x + bbox.x) / scale,
                        (up.y + bbox.y) / scale,
                        (bbox.w / scale).max(1),
                        (bbox.h / scale).max(1),
                    );
                    candidates.push(ObjectBox {
                        class: classify_region(&mapped, prior.frame_w, prior.frame_h).to_string(),
                        bbox: mapped,
                        confidence,
                        pass: DetectionPass::Fine,
                    });
                }
            }
            candidates.extend(prior.boxes.iter().cloned());

            Ok(ObjectsPayload {
                boxes: cross_pass_nms(candidates, NMS_IOU),
                frame_w: prior.frame_w,
                frame_h: prior.frame_h,
                tiles_analyzed: prior.tiles_analyzed,
            })
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Objects(payload))
    }
}
