//! Prep stage: probe, frame/audio extraction and shot segmentation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use framely_models::Shot;

use crate::error::MediaResult;
use crate::ffmpeg::{extract_audio, extract_frames};
use crate::probe::{probe, VideoInfo};
use crate::shots::segment_shots;

/// Everything the DAG needs, produced once before any detector runs.
#[derive(Debug, Clone)]
pub struct PrepOutput {
    pub info: VideoInfo,
    pub shots: Vec<Shot>,
    pub frames_dir: PathBuf,
    /// Absent when the source has no audio stream.
    pub audio_path: Option<PathBuf>,
}

/// Run the prep stage for one video.
///
/// Decodes keyframes into `frames_dir`, extracts `audio.wav` next to it,
/// and segments shots. Every frame of every returned shot has a decoded
/// path on disk before this function returns.
pub async fn prepare(video: &Path, job_dir: &Path, frame_stride: u32) -> MediaResult<PrepOutput> {
    let started = Instant::now();
    let info = probe(video).await?;
    info!(
        duration_s = info.duration_s,
        fps = info.fps,
        w = info.width,
        h = info.height,
        frames = info.total_frames,
        "probed source video"
    );

    let frames_dir = job_dir.join("frames");
    let frame_paths = extract_frames(video, &frames_dir, frame_stride).await?;

    let audio_path = extract_audio(video, &job_dir.join("audio.wav"), info.has_audio).await?;

    // ffprobe frame estimates can drift from the decoder by a frame or two;
    // the decoded count is authoritative for the partition invariant.
    let total_frames = if frame_stride <= 1 {
        frame_paths.len() as u64
    } else {
        info.total_frames.max(frame_paths.len() as u64)
    };

    let shots = segment_shots(&frame_paths, total_frames, info.fps, frame_stride)?;

    metrics::histogram!("framely_prep_seconds").record(started.elapsed().as_secs_f64());
    info!(
        shots = shots.len(),
        frames = frame_paths.len(),
        has_audio = audio_path.is_some(),
        "prep complete"
    );

    Ok(PrepOutput {
        info: VideoInfo { total_frames, ..info },
        shots,
        frames_dir,
        audio_path,
    })
}
