//! ffprobe metadata probe.

use std::path::Path;

use serde::Deserialize;

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::run_ffprobe;

/// Probed video metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration_s: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Total frame count; estimated from duration × fps when the container
    /// does not carry `nb_frames`.
    pub total_frames: u64,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probe a media file with ffprobe.
pub async fn probe(path: &Path) -> MediaResult<VideoInfo> {
    let path_str = path.to_string_lossy().into_owned();
    let json = run_ffprobe(&[
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        &path_str,
    ])
    .await?;

    parse_probe(&json)
}

fn parse_probe(json: &str) -> MediaResult<VideoInfo> {
    let out: ProbeOutput = serde_json::from_str(json)?;

    let video = out
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::probe_failed("no video stream"))?;
    let has_audio = out.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio"));

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rate))
        .filter(|f| f.is_finite() && *f > 0.0)
        .ok_or_else(|| MediaError::probe_failed("no usable frame rate"))?;

    let duration_s = video
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            out.format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok())
        })
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| MediaError::probe_failed("no usable duration"))?;

    let total_frames = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration_s * fps).round().max(1.0) as u64);

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::probe_failed("no usable resolution")),
    };

    Ok(VideoInfo { duration_s, fps, width, height, total_frames, has_audio })
}

fn parse_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => rate.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "width": 640, "height": 360,
             "avg_frame_rate": "30/1", "nb_frames": "300", "duration": "10.0"},
            {"codec_type": "audio", "avg_frame_rate": "0/0"}
        ],
        "format": {"duration": "10.02"}
    }"#;

    #[test]
    fn parses_probe_json() {
        let info = parse_probe(SAMPLE).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 360);
        assert_eq!(info.fps, 30.0);
        assert_eq!(info.total_frames, 300);
        assert!(info.has_audio);
    }

    #[test]
    fn estimates_frames_without_nb_frames() {
        let json = SAMPLE.replace(r#""nb_frames": "300", "#, "");
        let info = parse_probe(&json).unwrap();
        assert_eq!(info.total_frames, 300);
    }

    #[test]
    fn rejects_audio_only_input() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3"}}"#;
        assert!(parse_probe(json).is_err());
    }

    #[test]
    fn parses_fractional_rates() {
        assert_eq!(parse_rate("30000/1001").map(|f| (f * 1000.0).round()), Some(29970.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
    }
}
