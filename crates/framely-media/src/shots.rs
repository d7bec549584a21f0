//! Shot boundary detection over decoded keyframes.

use std::path::PathBuf;

use image::imageops::FilterType;
use rayon::prelude::*;
use tracing::debug;

use framely_models::{AudioWindow, Shot};

use crate::error::{MediaError, MediaResult};

/// Histogram bins used for frame comparison.
const HIST_BINS: usize = 32;
/// Histogram distance that opens a boundary (0..1).
const HIST_ENTER: f64 = 0.35;
/// Histogram distance below which the detector re-arms.
const HIST_EXIT: f64 = 0.18;
/// Mean-luminance jump that opens a boundary (fraction of full scale).
const LUMA_ENTER: f64 = 0.28;
/// Luminance delta below which the detector re-arms.
const LUMA_EXIT: f64 = 0.12;
/// Minimum shot length in analyzed frames.
const MIN_SHOT_FRAMES: usize = 12;
/// Comparison resolution; frames are downscaled before measuring.
const COMPARE_W: u32 = 160;
const COMPARE_H: u32 = 90;

/// Per-frame boundary signals: normalized luma histogram and mean luma.
#[derive(Debug, Clone)]
struct FrameSignature {
    hist: [f64; HIST_BINS],
    mean_luma: f64,
}

/// Detect shot boundaries and build the shot list.
///
/// `frame_paths` are the decoded keyframes in frame order; `frame_stride`
/// maps analyzed-frame indices back to source frame indices. The returned
/// shots tile `[0, total_frames)` with no gaps or overlap.
pub fn segment_shots(
    frame_paths: &[PathBuf],
    total_frames: u64,
    fps: f64,
    frame_stride: u32,
) -> MediaResult<Vec<Shot>> {
    if frame_paths.is_empty() {
        return Err(MediaError::NoShots("no decoded frames".into()));
    }

    let signatures: Vec<Option<FrameSignature>> = frame_paths
        .par_iter()
        .map(|p| frame_signature(p).ok())
        .collect();

    let mut boundaries = detect_boundaries(&signatures);
    boundaries.push(frame_paths.len());

    let stride = frame_stride.max(1) as u64;
    let mut shots = Vec::with_capacity(boundaries.len());
    for (shot_id, window) in boundaries.windows(2).enumerate() {
        let (begin, end) = (window[0], window[1]);
        if begin >= end {
            continue;
        }
        let start_frame = begin as u64 * stride;
        let end_frame = if end == frame_paths.len() { total_frames } else { end as u64 * stride };
        let frame_count = end_frame - start_frame;
        shots.push(Shot {
            shot_id: shot_id as u32,
            start_frame,
            end_frame,
            frame_count,
            duration_s: frame_count as f64 / fps,
            frame_paths: frame_paths[begin..end].to_vec(),
            audio_window: AudioWindow {
                start_s: start_frame as f64 / fps,
                end_s: end_frame as f64 / fps,
            },
        });
    }

    debug!(shots = shots.len(), frames = frame_paths.len(), "segmented shots");
    if shots.is_empty() {
        return Err(MediaError::NoShots("segmentation produced no shots".into()));
    }
    Ok(shots)
}

/// Boundary indices (each starts a new shot), always beginning with 0.
///
/// A boundary opens when the histogram distance or the mean-luminance
/// delta between adjacent frames clears its entry threshold. The detector
/// then disarms until both signals fall back under their exit thresholds,
/// so a dissolve or flash that stays hot across several frames fires one
/// boundary instead of a train of them. Boundaries closer than the
/// minimum shot length are suppressed.
fn detect_boundaries(signatures: &[Option<FrameSignature>]) -> Vec<usize> {
    let mut boundaries = vec![0usize];
    let mut last_boundary = 0usize;
    let mut armed = true;

    for i in 1..signatures.len() {
        let (Some(a), Some(b)) = (signatures[i - 1].as_ref(), signatures[i].as_ref()) else {
            continue;
        };
        let hist_dist = histogram_distance(&a.hist, &b.hist);
        let luma_delta = (a.mean_luma - b.mean_luma).abs() / 255.0;

        if armed {
            if (hist_dist > HIST_ENTER || luma_delta > LUMA_ENTER)
                && i - last_boundary >= MIN_SHOT_FRAMES
            {
                boundaries.push(i);
                last_boundary = i;
                armed = false;
            }
        } else if hist_dist < HIST_EXIT && luma_delta < LUMA_EXIT {
            armed = true;
        }
    }
    boundaries
}

/// Measure one downscaled frame.
fn frame_signature(path: &PathBuf) -> MediaResult<FrameSignature> {
    let img = image::open(path)
        .map_err(|e| MediaError::decode_failed(format!("{}: {e}", path.display())))?;
    let small = img.resize_exact(COMPARE_W, COMPARE_H, FilterType::Triangle).to_luma8();

    let mut hist = [0f64; HIST_BINS];
    let mut luma_sum = 0f64;
    for pixel in small.pixels() {
        hist[(pixel.0[0] as usize * HIST_BINS) / 256] += 1.0;
        luma_sum += pixel.0[0] as f64;
    }
    let total = (COMPARE_W * COMPARE_H) as f64;
    for bin in &mut hist {
        *bin /= total;
    }
    Ok(FrameSignature { hist, mean_luma: luma_sum / total })
}

/// Half the L1 distance between two normalized histograms, in 0..1.
fn histogram_distance(a: &[f64; HIST_BINS], b: &[f64; HIST_BINS]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_signature(bin: usize, mean_luma: f64) -> Option<FrameSignature> {
        let mut hist = [0f64; HIST_BINS];
        hist[bin] = 1.0;
        Some(FrameSignature { hist, mean_luma })
    }

    #[test]
    fn histogram_distance_bounds() {
        let mut a = [0.0; HIST_BINS];
        let mut b = [0.0; HIST_BINS];
        a[0] = 1.0;
        b[HIST_BINS - 1] = 1.0;
        assert!((histogram_distance(&a, &a)).abs() < 1e-12);
        assert!((histogram_distance(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn hard_cut_fires_one_boundary() {
        // 20 dark frames, then 20 bright ones.
        let mut frames: Vec<_> = (0..20).map(|_| flat_signature(2, 20.0)).collect();
        frames.extend((0..20).map(|_| flat_signature(28, 230.0)));
        assert_eq!(detect_boundaries(&frames), vec![0, 20]);
    }

    #[test]
    fn luminance_jump_alone_opens_a_boundary() {
        // Same histogram bin, large mean-luma step: the luma-delta signal
        // has to carry the detection.
        let mut frames: Vec<_> = (0..16).map(|_| flat_signature(15, 120.0)).collect();
        frames.extend((0..16).map(|_| flat_signature(15, 230.0)));
        assert_eq!(detect_boundaries(&frames), vec![0, 16]);
    }

    #[test]
    fn hysteresis_suppresses_boundary_trains() {
        // A flash: every adjacent pair alternates far apart for a while.
        // Without re-arming this would fire on each hot pair.
        let mut frames: Vec<_> = (0..16).map(|_| flat_signature(2, 20.0)).collect();
        for i in 0..16 {
            frames.push(if i % 2 == 0 {
                flat_signature(28, 230.0)
            } else {
                flat_signature(2, 20.0)
            });
        }
        let boundaries = detect_boundaries(&frames);
        assert_eq!(boundaries, vec![0, 16]);
    }

    #[test]
    fn short_shots_are_suppressed() {
        // A cut only 4 frames after the previous boundary is ignored.
        let mut frames: Vec<_> = (0..4).map(|_| flat_signature(2, 20.0)).collect();
        frames.extend((0..20).map(|_| flat_signature(28, 230.0)));
        assert_eq!(detect_boundaries(&frames), vec![0]);
    }

    #[test]
    fn segmentation_requires_frames() {
        assert!(segment_shots(&[], 0, 30.0, 1).is_err());
    }
}
