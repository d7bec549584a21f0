//! Conditional super-resolution pass.

use async_trait::async_trait;
use image::imageops::FilterType;

use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, ResourceClass, SrPayload,
};

use super::{Detector, DetectorCtx};

const SCALE: u32 = 4;

/// Paths the super-resolution pass writes for a shot, in frame order.
///
/// The scheduler uses this to hand the upscaled frames to the fine pass
/// without re-listing the directory.
pub fn sr_frame_paths(work_dir: &std::path::Path, shot: &framely_models::Shot) -> Vec<std::path::PathBuf> {
    let out_dir = work_dir.join("sr").join(format!("shot_{:04}", shot.shot_id));
    shot.sample_frames(3)
        .iter()
        .filter_map(|p| p.file_name().map(|name| out_dir.join(name)))
        .collect()
}

/// 4x upscale of a shot's keyframes when the frame height is below the
/// configured trigger. Upscaled frames are written under
/// `work_dir/sr/shot_<id>/` and consumed by the fine object pass.
pub struct SuperResolution;

#[async_trait]
impl Detector for SuperResolution {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SuperResolution
    }

    fn tool(&self) -> &'static str {
        "realesrgan"
    }

    fn version(&self) -> &'static str {
        "0.3.0"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("x4plus")
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::GpuHeavy
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        let anchor = ctx
            .shot
            .anchor_frame()
            .ok_or_else(|| DetectorFault::input_defect("shot has no frames"))?;
        let probe = image::image_dimensions(anchor)
            .map_err(|e| DetectorFault::input_defect(format!("{}: {e}", anchor.display())))?;

        if !cfg.superres.enabled || probe.1 >= cfg.superres.trigger_min_h {
            return Ok(DetectorPayload::Sr(SrPayload {
                applied: false,
                scale_factor: SCALE,
                frames_upscaled: 0,
            }));
        }

        // Upscale a bounded sample; the fine pass reads its anchor from
        // this set, not from every keyframe.
        let inputs = ctx.shot.sample_frames(3);
        let out_dir = ctx.work_dir.join("sr").join(format!("shot_{:04}", ctx.shot.shot_id));
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| DetectorFault::internal(format!("create sr dir: {e}")))?;

        let upscaled = tokio::task::spawn_blocking(move || -> Result<u32, DetectorFault> {
            let mut count = 0u32;
            for input in &inputs {
                let img = image::open(input)
                    .map_err(|e| DetectorFault::input_defect(format!("{}: {e}", input.display())))?;
                let up = image::imageops::resize(
                    &img.to_rgb8(),
                    img.width() * SCALE,
                    img.height() * SCALE,
                    FilterType::Lanczos3,
                );
                let name = input.file_name().ok_or_else(|| {
                    DetectorFault::internal(format!("frame without a name: {}", input.display()))
                })?;
                up.save(out_dir.join(name))
                    .map_err(|e| DetectorFault::internal(format!("save upscaled frame: {e}")))?;
                count += 1;
            }
            Ok(count)
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Sr(SrPayload {
            applied: true,
            scale_factor: SCALE,
            frames_upscaled: upscaled,
        }))
    }
}
