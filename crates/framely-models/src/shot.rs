//! Shot model: the unit of per-detector work.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The audio interval owned by a shot, in seconds from video start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioWindow {
    pub start_s: f64,
    pub end_s: f64,
}

impl AudioWindow {
    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }
}

/// A contiguous range of frames between detected boundaries.
///
/// Derived once in prep and immutable thereafter. Frame ranges are
/// half-open: `[start_frame, end_frame)`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Shot {
    /// Shot index within the job, dense from 0.
    pub shot_id: u32,
    /// First frame of the shot (inclusive).
    pub start_frame: u64,
    /// One past the last frame of the shot.
    pub end_frame: u64,
    /// Number of frames in the shot.
    pub frame_count: u64,
    /// Shot duration in seconds.
    pub duration_s: f64,
    /// Decoded keyframe paths, ordered by frame index.
    pub frame_paths: Vec<PathBuf>,
    /// Audio window covered by this shot.
    pub audio_window: AudioWindow,
}

impl Shot {
    /// The frame used for single-frame detectors (middle keyframe).
    pub fn anchor_frame(&self) -> Option<&PathBuf> {
        if self.frame_paths.is_empty() {
            None
        } else {
            self.frame_paths.get(self.frame_paths.len() / 2)
        }
    }

    /// First decoded keyframe of the shot.
    pub fn first_frame(&self) -> Option<&PathBuf> {
        self.frame_paths.first()
    }

    /// Last decoded keyframe of the shot.
    pub fn last_frame(&self) -> Option<&PathBuf> {
        self.frame_paths.last()
    }

    /// Sample up to `max` frame paths evenly spaced across the shot.
    pub fn sample_frames(&self, max: usize) -> Vec<PathBuf> {
        if max == 0 || self.frame_paths.is_empty() {
            return Vec::new();
        }
        let n = self.frame_paths.len();
        if n <= max {
            return self.frame_paths.clone();
        }
        (0..max)
            .map(|i| self.frame_paths[i * (n - 1) / (max - 1).max(1)].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot_with_frames(n: usize) -> Shot {
        Shot {
            shot_id: 0,
            start_frame: 0,
            end_frame: n as u64,
            frame_count: n as u64,
            duration_s: n as f64 / 30.0,
            frame_paths: (0..n).map(|i| PathBuf::from(format!("frame_{i:08}.jpg"))).collect(),
            audio_window: AudioWindow { start_s: 0.0, end_s: n as f64 / 30.0 },
        }
    }

    #[test]
    fn sample_frames_keeps_endpoints() {
        let shot = shot_with_frames(100);
        let sampled = shot.sample_frames(4);
        assert_eq!(sampled.len(), 4);
        assert_eq!(sampled[0], shot.frame_paths[0]);
        assert_eq!(sampled[3], shot.frame_paths[99]);
    }

    #[test]
    fn sample_frames_short_shot_returns_all() {
        let shot = shot_with_frames(3);
        assert_eq!(shot.sample_frames(16).len(), 3);
    }

    #[test]
    fn anchor_frame_of_empty_shot_is_none() {
        let shot = shot_with_frames(0);
        assert!(shot.anchor_frame().is_none());
    }
}
