//! Thin wrappers around the ffmpeg/ffprobe CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Locate the ffmpeg binary on PATH.
pub fn ffmpeg_path() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|e| MediaError::FfmpegMissing(e.to_string()))
}

/// Locate the ffprobe binary on PATH.
pub fn ffprobe_path() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|e| MediaError::FfmpegMissing(e.to_string()))
}

/// Run ffmpeg with the given args, returning captured stderr.
///
/// ffmpeg writes all diagnostics (including filter summaries we parse) to
/// stderr; stdout is discarded unless the caller routes output to a file.
pub async fn run_ffmpeg(args: &[&str]) -> MediaResult<String> {
    let bin = ffmpeg_path()?;
    debug!(args = ?args, "running ffmpeg");

    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(MediaError::decode_failed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            last_lines(&stderr, 6)
        )));
    }
    Ok(stderr)
}

/// Run ffmpeg for a pure measurement pass (`-f null -`), where a non-zero
/// exit still leaves parseable filter output on stderr.
pub async fn run_ffmpeg_measure(args: &[&str]) -> MediaResult<String> {
    let bin = ffmpeg_path()?;
    debug!(args = ?args, "running ffmpeg (measure)");

    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    Ok(String::from_utf8_lossy(&output.stderr).into_owned())
}

/// Run ffprobe, returning captured stdout (JSON).
pub async fn run_ffprobe(args: &[&str]) -> MediaResult<String> {
    let bin = ffprobe_path()?;
    debug!(args = ?args, "running ffprobe");

    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::probe_failed(format!(
            "ffprobe exited with {}: {}",
            output.status,
            last_lines(&stderr, 4)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract keyframes to `frames_dir/frame_%08d.jpg`, every `stride`-th frame.
pub async fn extract_frames(
    video: &Path,
    frames_dir: &Path,
    stride: u32,
) -> MediaResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(frames_dir).await?;
    let pattern = frames_dir.join("frame_%08d.jpg");
    let pattern_str = pattern.to_string_lossy().into_owned();
    let video_str = video.to_string_lossy().into_owned();

    let select = format!("select=not(mod(n\\,{}))", stride.max(1));
    let mut args: Vec<&str> = vec!["-y", "-i", &video_str];
    if stride > 1 {
        args.extend_from_slice(&["-vf", &select, "-vsync", "vfr"]);
    }
    args.extend_from_slice(&["-q:v", "2", "-start_number", "0", &pattern_str]);

    run_ffmpeg(&args).await?;

    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(frames_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "jpg") {
            frames.push(path);
        }
    }
    frames.sort();
    if frames.is_empty() {
        return Err(MediaError::decode_failed("no frames decoded"));
    }
    Ok(frames)
}

/// Extract the audio track to a 48 kHz stereo PCM WAV.
///
/// Returns `None` when the source has no audio stream.
pub async fn extract_audio(video: &Path, audio_out: &Path, has_audio: bool) -> MediaResult<Option<PathBuf>> {
    if !has_audio {
        return Ok(None);
    }
    let video_str = video.to_string_lossy().into_owned();
    let out_str = audio_out.to_string_lossy().into_owned();
    run_ffmpeg(&[
        "-y", "-i", &video_str, "-vn", "-ac", "2", "-ar", "48000", "-c:a", "pcm_s16le", &out_str,
    ])
    .await?;
    Ok(Some(audio_out.to_path_buf()))
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_lines_truncates() {
        let text = "a\nb\nc\nd";
        assert_eq!(last_lines(text, 2), "c\nd");
        assert_eq!(last_lines(text, 10), "a\nb\nc\nd");
    }
}
