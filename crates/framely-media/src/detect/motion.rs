//! Motion and saliency analysis.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::GrayImage;

use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, MotionPayload, ResourceClass,
    SaliencyStats,
};

use super::vision::cell_stats;
use super::{Detector, DetectorCtx};

const SAMPLE_W: u32 = 160;
const SAMPLE_H: u32 = 90;
/// Frame pairs sampled per shot for motion estimation.
const MAX_PAIRS: usize = 8;

pub struct MotionAnalyzer;

#[async_trait]
impl Detector for MotionAnalyzer {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Motion
    }

    fn tool(&self) -> &'static str {
        "flowstat"
    }

    fn version(&self) -> &'static str {
        "0.7.0"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        _cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        if ctx.shot.frame_paths.is_empty() {
            return Err(DetectorFault::input_defect("shot has no frames"));
        }
        let frames = ctx.shot.sample_frames(MAX_PAIRS + 1);

        let payload = tokio::task::spawn_blocking(move || -> Result<MotionPayload, DetectorFault> {
            let small: Vec<GrayImage> = frames
                .iter()
                .map(|p| {
                    image::open(p)
                        .map(|img| {
                            img.resize_exact(SAMPLE_W, SAMPLE_H, FilterType::Triangle).to_luma8()
                        })
                        .map_err(|e| DetectorFault::input_defect(format!("{}: {e}", p.display())))
                })
                .collect::<Result<_, _>>()?;

            let mut mean_motion = 0f32;
            let mut max_motion = 0f32;
            let pairs = small.len().saturating_sub(1);
            for pair in small.windows(2) {
                let diff = mean_abs_diff(&pair[0], &pair[1]);
                mean_motion += diff;
                max_motion = max_motion.max(diff);
            }
            if pairs > 0 {
                mean_motion /= pairs as f32;
            }

            let anchor = &small[small.len() / 2];
            Ok(MotionPayload { mean_motion, max_motion, saliency: saliency(anchor) })
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Motion(payload))
    }
}

fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f32 {
    let n = (a.width() * a.height()) as f32;
    let sum: f32 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| (pa.0[0] as f32 - pb.0[0] as f32).abs())
        .sum();
    sum / n / 255.0
}

/// Saliency from local-contrast mass: centroid plus spatial spread.
fn saliency(img: &GrayImage) -> SaliencyStats {
    let stats = cell_stats(img);
    let mut mass = 0f32;
    let mut mx = 0f32;
    let mut my = 0f32;
    for cy in 0..stats.cells_y {
        for cx in 0..stats.cells_x {
            let m = stats.stddev[[cy, cx]];
            mass += m;
            mx += m * (cx as f32 + 0.5);
            my += m * (cy as f32 + 0.5);
        }
    }
    if mass <= f32::EPSILON {
        return SaliencyStats { centroid_x: 0.5, centroid_y: 0.5, spread: 1.0 };
    }
    let centroid_x = mx / mass / stats.cells_x as f32;
    let centroid_y = my / mass / stats.cells_y as f32;

    let mut spread = 0f32;
    for cy in 0..stats.cells_y {
        for cx in 0..stats.cells_x {
            let dx = (cx as f32 + 0.5) / stats.cells_x as f32 - centroid_x;
            let dy = (cy as f32 + 0.5) / stats.cells_y as f32 - centroid_y;
            spread += stats.stddev[[cy, cx]] * (dx * dx + dy * dy).sqrt();
        }
    }
    SaliencyStats { centroid_x, centroid_y, spread: (spread / mass).min(1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn identical_frames_have_zero_motion() {
        let img = GrayImage::from_pixel(SAMPLE_W, SAMPLE_H, Luma([90]));
        assert!(mean_abs_diff(&img, &img) < 1e-9);
    }

    #[test]
    fn inverted_frames_have_high_motion() {
        let a = GrayImage::from_pixel(SAMPLE_W, SAMPLE_H, Luma([0]));
        let b = GrayImage::from_pixel(SAMPLE_W, SAMPLE_H, Luma([255]));
        assert!((mean_abs_diff(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn saliency_centroid_follows_texture() {
        // Texture concentrated in the right half pulls the centroid right.
        let img = GrayImage::from_fn(SAMPLE_W, SAMPLE_H, |x, _| {
            if x > SAMPLE_W / 2 && x % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let s = saliency(&img);
        assert!(s.centroid_x > 0.6, "centroid_x = {}", s.centroid_x);
    }

    #[test]
    fn flat_frame_reports_neutral_saliency() {
        let img = GrayImage::from_pixel(SAMPLE_W, SAMPLE_H, Luma([120]));
        let s = saliency(&img);
        assert_eq!(s.centroid_x, 0.5);
        assert_eq!(s.centroid_y, 0.5);
    }
}
