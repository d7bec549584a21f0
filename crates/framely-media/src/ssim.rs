//! Grayscale structural similarity between frames.

use std::path::Path;

use image::imageops::FilterType;
use image::GrayImage;

use crate::error::{MediaError, MediaResult};

const SSIM_W: u32 = 128;
const SSIM_H: u32 = 72;
const C1: f64 = 6.5025; // (0.01 * 255)^2
const C2: f64 = 58.5225; // (0.03 * 255)^2

/// Global SSIM over downscaled grayscale frames, in 0..1.
pub fn ssim_files(a: &Path, b: &Path) -> MediaResult<f64> {
    let a = load_small(a)?;
    let b = load_small(b)?;
    Ok(ssim(&a, &b))
}

fn load_small(path: &Path) -> MediaResult<GrayImage> {
    let img = image::open(path)
        .map_err(|e| MediaError::decode_failed(format!("{}: {e}", path.display())))?;
    Ok(img.resize_exact(SSIM_W, SSIM_H, FilterType::Triangle).to_luma8())
}

/// SSIM over two equally sized grayscale images.
pub fn ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let n = (a.width() * a.height()) as f64;
    if n == 0.0 {
        return 0.0;
    }

    let (mut sum_a, mut sum_b) = (0f64, 0f64);
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        sum_a += pa.0[0] as f64;
        sum_b += pb.0[0] as f64;
    }
    let (mu_a, mu_b) = (sum_a / n, sum_b / n);

    let (mut var_a, mut var_b, mut cov) = (0f64, 0f64, 0f64);
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let da = pa.0[0] as f64 - mu_a;
        let db = pb.0[0] as f64 - mu_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    let num = (2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2);
    let den = (mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2);
    (num / den).clamp(0.0, 1.0)
}
