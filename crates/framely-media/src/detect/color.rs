//! Color and composition analysis.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::RgbImage;

use framely_models::{
    AnalysisConfig, ColorPayload, DetectorFault, DetectorKind, DetectorPayload, ResourceClass,
};

use super::vision::load_rgb;
use super::{Detector, DetectorCtx};

const SAMPLE_W: u32 = 160;
const SAMPLE_H: u32 = 90;
const PALETTE_SIZE: usize = 5;

pub struct ColorAnalyzer;

#[async_trait]
impl Detector for ColorAnalyzer {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Color
    }

    fn tool(&self) -> &'static str {
        "colorstat"
    }

    fn version(&self) -> &'static str {
        "1.0.4"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
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

        let payload = tokio::task::spawn_blocking(move || -> Result<ColorPayload, DetectorFault> {
            let rgb = load_rgb(&frame)?;
            let small = image::imageops::resize(&rgb, SAMPLE_W, SAMPLE_H, FilterType::Triangle);
            Ok(analyze(&small))
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Color(payload))
    }
}

fn analyze(img: &RgbImage) -> ColorPayload {
    let n = (img.width() * img.height()) as f64;

    // 4-bit per channel quantized histogram for the dominant palette.
    let mut hist: std::collections::HashMap<(u8, u8, u8), u32> = std::collections::HashMap::new();
    let mut luma_sum = 0f64;
    let mut luma_sq = 0f64;
    let mut sat_sum = 0f64;
    // Luminance mass per thirds cell for composition balance.
    let mut thirds = [[0f64; 3]; 3];

    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        *hist.entry((r >> 4, g >> 4, b >> 4)).or_default() += 1;

        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        luma_sum += luma;
        luma_sq += luma * luma;

        let max = r.max(g).max(b) as f64;
        let min = r.min(g).min(b) as f64;
        if max > 0.0 {
            sat_sum += (max - min) / max;
        }

        let tx = ((x * 3) / img.width()).min(2) as usize;
        let ty = ((y * 3) / img.height()).min(2) as usize;
        thirds[ty][tx] += luma;
    }

    let mut ranked: Vec<((u8, u8, u8), u32)> = hist.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let dominant = ranked
        .iter()
        .take(PALETTE_SIZE)
        .map(|((r, g, b), _)| {
            // Re-expand the quantized bucket to its center.
            format!("#{:02x}{:02x}{:02x}", (r << 4) | 0x8, (g << 4) | 0x8, (b << 4) | 0x8)
        })
        .collect();

    let mean = luma_sum / n;
    let variance = (luma_sq / n - mean * mean).max(0.0);

    // Balance: how evenly luminance spreads over the thirds grid.
    let total_luma: f64 = thirds.iter().flatten().sum();
    let thirds_balance = if total_luma > 0.0 {
        let ideal = total_luma / 9.0;
        let deviation: f64 =
            thirds.iter().flatten().map(|v| (v - ideal).abs()).sum::<f64>() / (2.0 * total_luma);
        (1.0 - deviation).clamp(0.0, 1.0)
    } else {
        0.0
    };

    ColorPayload {
        dominant,
        brightness: (mean / 255.0) as f32,
        contrast: (variance.sqrt() / 128.0).min(1.0) as f32,
        saturation: (sat_sum / n) as f32,
        thirds_balance: thirds_balance as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn flat_gray_image_statistics() {
        let img = RgbImage::from_pixel(SAMPLE_W, SAMPLE_H, Rgb([128, 128, 128]));
        let payload = analyze(&img);
        assert!((payload.brightness - 0.5).abs() < 0.02);
        assert!(payload.contrast < 0.01);
        assert!(payload.saturation < 0.01);
        assert_eq!(payload.dominant.len(), 1);
        // Uniform luminance spreads evenly over the thirds grid.
        assert!(payload.thirds_balance > 0.9);
    }

    #[test]
    fn saturated_image_reports_high_saturation() {
        let img = RgbImage::from_pixel(SAMPLE_W, SAMPLE_H, Rgb([255, 0, 0]));
        let payload = analyze(&img);
        assert!(payload.saturation > 0.95);
        assert_eq!(payload.dominant[0], "#f80808");
    }
}
