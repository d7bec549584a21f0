//! Transition classification across adjacent shots.

use async_trait::async_trait;

use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, ResourceClass, TransitionKind,
    TransitionPayload,
};

use crate::ssim::ssim_files;

use super::vision::load_luma;
use super::{Detector, DetectorCtx};

/// SSIM below this is a hard cut.
const CUT_SSIM: f64 = 0.2;
/// SSIM below this (but above the cut bound) is a soft transition.
const SOFT_SSIM: f64 = 0.45;
/// Mean luminance below this marks a fade-through-black boundary frame.
const FADE_LUMA: f64 = 24.0;

/// Classifies the boundary between a shot and its predecessor from the
/// structural similarity of the two boundary frames.
pub struct TransitionClassifier;

#[async_trait]
impl Detector for TransitionClassifier {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Transition
    }

    fn tool(&self) -> &'static str {
        "ssim-transition"
    }

    fn version(&self) -> &'static str {
        "1.2.0"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        _cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        let prev = ctx
            .prev_shot
            .as_ref()
            .ok_or_else(|| DetectorFault::input_defect("no adjacent shot"))?;
        let out_frame = prev
            .last_frame()
            .ok_or_else(|| DetectorFault::input_defect("previous shot has no frames"))?
            .clone();
        let in_frame = ctx
            .shot
            .first_frame()
            .ok_or_else(|| DetectorFault::input_defect("shot has no frames"))?
            .clone();
        let (from_shot, to_shot) = (prev.shot_id, ctx.shot.shot_id);

        let payload =
            tokio::task::spawn_blocking(move || -> Result<TransitionPayload, DetectorFault> {
                let score = ssim_files(&out_frame, &in_frame)
                    .map_err(|e| DetectorFault::input_defect(e.to_string()))?;

                let kind = if score < CUT_SSIM {
                    TransitionKind::Cut
                } else if score < SOFT_SSIM {
                    if mean_luma(&out_frame)? < FADE_LUMA || mean_luma(&in_frame)? < FADE_LUMA {
                        TransitionKind::Fade
                    } else {
                        TransitionKind::Dissolve
                    }
                } else {
                    TransitionKind::Continuous
                };

                Ok(TransitionPayload { kind, ssim: score, from_shot, to_shot })
            })
            .await
            .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Transition(payload))
    }
}

fn mean_luma(path: &std::path::Path) -> Result<f64, DetectorFault> {
    let img = load_luma(path)?;
    let n = (img.width() * img.height()) as f64;
    if n == 0.0 {
        return Ok(0.0);
    }
    Ok(img.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n)
}
