//! Text region detection and typography estimates.

use async_trait::async_trait;
use image::GrayImage;
use ndarray::Array2;

use framely_models::{
    AnalysisConfig, DetectorFault, DetectorKind, DetectorPayload, ResourceClass, TextBox,
    TextPayload,
};

use super::vision::{group_cells, load_luma, CELL};
use super::{Detector, DetectorCtx};

/// Text regions have dense horizontal gradient transitions.
const GRADIENT_MIN: f32 = 18.0;
/// Text lines are wide relative to their height.
const ASPECT_MIN: f32 = 1.8;

pub struct TextDetector;

#[async_trait]
impl Detector for TextDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Text
    }

    fn tool(&self) -> &'static str {
        "textspot"
    }

    fn version(&self) -> &'static str {
        "0.9.3"
    }

    fn checkpoint(&self) -> Option<&'static str> {
        Some("ocr-det-s")
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

        let regions = tokio::task::spawn_blocking(move || -> Result<Vec<TextBox>, DetectorFault> {
            let img = load_luma(&frame)?;
            Ok(find_text_regions(&img))
        })
        .await
        .map_err(|e| DetectorFault::internal(format!("join error: {e}")))??;

        Ok(DetectorPayload::Text(TextPayload { regions }))
    }
}

fn find_text_regions(img: &GrayImage) -> Vec<TextBox> {
    let (w, h) = img.dimensions();
    let cells_x = (w.div_ceil(CELL)) as usize;
    let cells_y = (h.div_ceil(CELL)) as usize;

    // Mean absolute horizontal gradient per cell.
    let mut gradient = Array2::<f32>::zeros((cells_y, cells_x));
    let mut counts = Array2::<f32>::zeros((cells_y, cells_x));
    for y in 0..h {
        for x in 1..w {
            let g = (img.get_pixel(x, y).0[0] as i32 - img.get_pixel(x - 1, y).0[0] as i32).abs();
            let cy = (y / CELL) as usize;
            let cx = (x / CELL) as usize;
            gradient[[cy, cx]] += g as f32;
            counts[[cy, cx]] += 1.0;
        }
    }
    for (g, c) in gradient.iter_mut().zip(counts.iter()) {
        if *c > 0.0 {
            *g /= c;
        }
    }

    let active = gradient.mapv(|g| g > GRADIENT_MIN);
    let caption_band_top = h * 2 / 3;

    group_cells(&active, w, h, 2)
        .into_iter()
        .filter(|b| b.w as f32 / b.h.max(1) as f32 >= ASPECT_MIN)
        .map(|bbox| {
            let mean_gradient = {
                let cx0 = (bbox.x / CELL) as usize;
                let cy0 = (bbox.y / CELL) as usize;
                let cx1 = ((bbox.right().div_ceil(CELL)) as usize).min(cells_x);
                let cy1 = ((bbox.bottom().div_ceil(CELL)) as usize).min(cells_y);
                let mut sum = 0f32;
                let mut n = 0f32;
                for cy in cy0..cy1 {
                    for cx in cx0..cx1 {
                        sum += gradient[[cy, cx]];
                        n += 1.0;
                    }
                }
                if n > 0.0 {
                    sum / n
                } else {
                    0.0
                }
            };
            TextBox {
                confidence: (mean_gradient / (GRADIENT_MIN * 3.0)).clamp(0.0, 1.0),
                // Glyphs roughly fill the line height.
                est_glyph_px: (bbox.h as f32 * 0.7) as u32,
                caption_band: bbox.y >= caption_band_top,
                bbox,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn flat_image_has_no_text_regions() {
        let img = GrayImage::from_pixel(320, 240, Luma([128]));
        assert!(find_text_regions(&img).is_empty());
    }

    #[test]
    fn striped_caption_band_is_detected_as_caption() {
        let mut img = GrayImage::from_pixel(320, 240, Luma([30]));
        // Vertical stripes in the lower third mimic glyph edges.
        for y in 200..224 {
            for x in 40..280 {
                if (x / 3) % 2 == 0 {
                    img.put_pixel(x, y, Luma([240]));
                }
            }
        }
        let regions = find_text_regions(&img);
        assert!(!regions.is_empty());
        assert!(regions.iter().any(|r| r.caption_band));
    }
}
