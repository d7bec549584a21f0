//! Shared pixel helpers for the vision adapters.

use std::path::Path;

use image::{GrayImage, RgbImage};
use ndarray::Array2;

use framely_models::{BoundingBox, DetectorFault};

/// Cell edge for block statistics, in pixels.
pub const CELL: u32 = 16;

pub fn load_rgb(path: &Path) -> Result<RgbImage, DetectorFault> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| DetectorFault::input_defect(format!("{}: {e}", path.display())))
}

pub fn load_luma(path: &Path) -> Result<GrayImage, DetectorFault> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|e| DetectorFault::input_defect(format!("{}: {e}", path.display())))
}

/// Per-cell mean and standard deviation of luminance.
pub struct CellStats {
    pub mean: Array2<f32>,
    pub stddev: Array2<f32>,
    pub cells_x: usize,
    pub cells_y: usize,
}

pub fn cell_stats(img: &GrayImage) -> CellStats {
    let cells_x = (img.width().div_ceil(CELL)) as usize;
    let cells_y = (img.height().div_ceil(CELL)) as usize;
    let mut mean = Array2::<f32>::zeros((cells_y, cells_x));
    let mut stddev = Array2::<f32>::zeros((cells_y, cells_x));

    for cy in 0..cells_y {
        for cx in 0..cells_x {
            let x0 = cx as u32 * CELL;
            let y0 = cy as u32 * CELL;
            let x1 = (x0 + CELL).min(img.width());
            let y1 = (y0 + CELL).min(img.height());
            let n = ((x1 - x0) * (y1 - y0)) as f32;

            let mut sum = 0f32;
            let mut sum_sq = 0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    let v = img.get_pixel(x, y).0[0] as f32;
                    sum += v;
                    sum_sq += v * v;
                }
            }
            let mu = sum / n;
            mean[[cy, cx]] = mu;
            stddev[[cy, cx]] = (sum_sq / n - mu * mu).max(0.0).sqrt();
        }
    }

    CellStats { mean, stddev, cells_x, cells_y }
}

/// Group active cells into boxes via 4-connected flood fill.
///
/// `active` marks cells that passed the caller's threshold; returned boxes
/// are in pixel coordinates, clamped to the image.
pub fn group_cells(
    active: &Array2<bool>,
    img_w: u32,
    img_h: u32,
    min_cells: usize,
) -> Vec<BoundingBox> {
    let (cells_y, cells_x) = active.dim();
    let mut visited = Array2::<bool>::default((cells_y, cells_x));
    let mut boxes = Vec::new();

    for sy in 0..cells_y {
        for sx in 0..cells_x {
            if !active[[sy, sx]] || visited[[sy, sx]] {
                continue;
            }
            let mut queue = vec![(sy, sx)];
            visited[[sy, sx]] = true;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (sx, sy, sx, sy);
            let mut count = 0usize;

            while let Some((cy, cx)) = queue.pop() {
                count += 1;
                min_x = min_x.min(cx);
                max_x = max_x.max(cx);
                min_y = min_y.min(cy);
                max_y = max_y.max(cy);

                let neighbors = [
                    (cy.wrapping_sub(1), cx),
                    (cy + 1, cx),
                    (cy, cx.wrapping_sub(1)),
                    (cy, cx + 1),
                ];
                for (ny, nx) in neighbors {
                    if ny < cells_y && nx < cells_x && active[[ny, nx]] && !visited[[ny, nx]] {
                        visited[[ny, nx]] = true;
                        queue.push((ny, nx));
                    }
                }
            }

            if count < min_cells {
                continue;
            }
            let x = min_x as u32 * CELL;
            let y = min_y as u32 * CELL;
            let w = (((max_x + 1) as u32 * CELL).min(img_w)).saturating_sub(x);
            let h = (((max_y + 1) as u32 * CELL).min(img_h)).saturating_sub(y);
            if w > 0 && h > 0 {
                boxes.push(BoundingBox::new(x, y, w, h));
            }
        }
    }
    boxes
}

/// Contrast-based region proposals over a grayscale image.
///
/// Cells whose local contrast exceeds the image mean by one standard
/// deviation are grouped into candidate boxes; confidence reflects the
/// group's mean contrast relative to the activation threshold.
pub fn propose_regions(img: &GrayImage, min_side_px: u32) -> Vec<(BoundingBox, f32)> {
    let stats = cell_stats(img);
    let n = (stats.cells_x * stats.cells_y) as f32;
    if n == 0.0 {
        return Vec::new();
    }
    let mean_contrast = stats.stddev.sum() / n;
    let var = stats.stddev.mapv(|v| (v - mean_contrast).powi(2)).sum() / n;
    let threshold = mean_contrast + var.sqrt();

    let active = stats.stddev.mapv(|v| v > threshold);
    let min_cells = ((min_side_px.div_ceil(CELL)) as usize).max(1);
    group_cells(&active, img.width(), img.height(), min_cells)
        .into_iter()
        .filter(|b| b.w >= min_side_px && b.h >= min_side_px)
        .map(|bbox| {
            let contrast = region_mean(&stats.stddev, &bbox);
            let confidence = (contrast / (threshold + 1e-3)).clamp(0.0, 2.0) / 2.0;
            (bbox, confidence)
        })
        .collect()
}

fn region_mean(grid: &Array2<f32>, bbox: &BoundingBox) -> f32 {
    let (cells_y, cells_x) = grid.dim();
    let cx0 = (bbox.x / CELL) as usize;
    let cy0 = (bbox.y / CELL) as usize;
    let cx1 = ((bbox.right().div_ceil(CELL)) as usize).min(cells_x);
    let cy1 = ((bbox.bottom().div_ceil(CELL)) as usize).min(cells_y);

    let mut sum = 0f32;
    let mut count = 0f32;
    for cy in cy0..cy1.max(cy0 + 1).min(cells_y) {
        for cx in cx0..cx1.max(cx0 + 1).min(cells_x) {
            sum += grid[[cy, cx]];
            count += 1.0;
        }
    }
    if count == 0.0 {
        0.0
    } else {
        sum / count
    }
}

/// Geometry-based class label for a proposed region.
pub fn classify_region(bbox: &BoundingBox, img_w: u32, img_h: u32) -> &'static str {
    let frame_area = (img_w as u64 * img_h as u64).max(1);
    let frac = bbox.area() as f64 / frame_area as f64;
    let aspect = bbox.w as f64 / bbox.h.max(1) as f64;

    if frac > 0.25 {
        "backdrop"
    } else if aspect < 0.8 && frac > 0.02 {
        "subject"
    } else if aspect > 2.5 {
        "band"
    } else if frac < 0.005 {
        "detail"
    } else {
        "object"
    }
}

/// Fraction of pixels matching a skin-tone rule inside a box.
pub fn skin_fraction(img: &RgbImage, bbox: &BoundingBox) -> f32 {
    let x1 = bbox.right().min(img.width());
    let y1 = bbox.bottom().min(img.height());
    let mut hits = 0u32;
    let mut total = 0u32;
    for y in bbox.y..y1 {
        for x in bbox.x..x1 {
            let [r, g, b] = img.get_pixel(x, y).0;
            total += 1;
            let (r, g, b) = (r as i32, g as i32, b as i32);
            if r > 95 && g > 40 && b > 20 && r > g && r > b && (r - g).abs() > 15 {
                hits += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([230])
            } else {
                Luma([20])
            }
        })
    }

    #[test]
    fn flat_image_proposes_nothing() {
        let img = GrayImage::from_pixel(256, 256, Luma([100]));
        assert!(propose_regions(&img, 8).is_empty());
    }

    #[test]
    fn textured_patch_on_flat_background_is_found() {
        let mut img = GrayImage::from_pixel(256, 256, Luma([100]));
        let patch = checkerboard(64, 64);
        image::imageops::overlay(&mut img, &patch, 96, 96);
        let regions = propose_regions(&img, 8);
        assert!(!regions.is_empty());
        let (bbox, conf) = &regions[0];
        assert!(bbox.overlaps(&BoundingBox::new(96, 96, 64, 64)));
        assert!(*conf > 0.0);
    }

    #[test]
    fn group_cells_merges_adjacent_cells() {
        let mut active = Array2::<bool>::default((4, 4));
        active[[1, 1]] = true;
        active[[1, 2]] = true;
        active[[2, 1]] = true;
        let boxes = group_cells(&active, 64, 64, 1);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0], BoundingBox::new(16, 16, 32, 32));
    }

    #[test]
    fn classify_region_by_geometry() {
        assert_eq!(classify_region(&BoundingBox::new(0, 0, 600, 400), 640, 480), "backdrop");
        assert_eq!(classify_region(&BoundingBox::new(0, 0, 200, 20), 640, 480), "band");
        assert_eq!(classify_region(&BoundingBox::new(0, 0, 10, 10), 640, 480), "detail");
    }
}
