//! Audio engineering metrics via ffmpeg filter parsing.
//!
//! One measurement pass chains `ebur128` (loudness + true peak),
//! `silencedetect` (speech span estimation) and `astats` (levels per
//! channel); all three report on stderr, which is parsed here.

use async_trait::async_trait;

use framely_models::{
    AnalysisConfig, AudioPayload, DetectorFault, DetectorKind, DetectorPayload, ResourceClass,
    SpeechSpan,
};

use crate::ffmpeg::run_ffmpeg_measure;

use super::{Detector, DetectorCtx};

/// silencedetect noise floor; doubles as the clarity SNR reference.
const NOISE_FLOOR_DB: f64 = -35.0;
const MIN_SILENCE_S: f64 = 0.3;

pub struct AudioMeter;

#[async_trait]
impl Detector for AudioMeter {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Audio
    }

    fn tool(&self) -> &'static str {
        "audio-meter"
    }

    fn version(&self) -> &'static str {
        "2.3.0"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn detect(
        &self,
        ctx: &DetectorCtx,
        cfg: &AnalysisConfig,
    ) -> Result<DetectorPayload, DetectorFault> {
        let Some(audio_path) = &ctx.audio_path else {
            // No audio stream: valid empty-speech result, trace complete
            // by convention over zero audio duration.
            return Ok(DetectorPayload::Audio(silent_payload()));
        };

        let window = ctx.shot.audio_window;
        let duration = window.duration_s();
        if duration <= 0.0 {
            return Err(DetectorFault::input_defect("empty audio window"));
        }

        let start = format!("{:.3}", window.start_s);
        let dur = format!("{duration:.3}");
        let audio = audio_path.to_string_lossy().into_owned();
        let filter = format!(
            "ebur128=peak=true,silencedetect=noise={NOISE_FLOOR_DB}dB:d={MIN_SILENCE_S},astats"
        );

        let stderr = run_ffmpeg_measure(&[
            "-hide_banner", "-nostats", "-ss", &start, "-t", &dur, "-i", &audio, "-af", &filter,
            "-f", "null", "-",
        ])
        .await
        .map_err(|e| DetectorFault::internal(format!("audio measurement: {e}")))?;

        let stoi_enabled = cfg.stoi.enabled && !cfg.ablations.light_audio;
        Ok(DetectorPayload::Audio(parse_measurement(
            &stderr,
            window.start_s,
            duration,
            stoi_enabled,
        )))
    }
}

fn silent_payload() -> AudioPayload {
    AudioPayload {
        lufs_integrated: -70.0,
        loudness_range: 0.0,
        true_peak_dbtp: -99.0,
        dynamic_range_db: 0.0,
        speech_spans: Vec::new(),
        clarity: None,
        stereo_phase: 1.0,
        lufs_trace: 1.0,
    }
}

fn parse_measurement(
    stderr: &str,
    window_start_s: f64,
    duration_s: f64,
    stoi_enabled: bool,
) -> AudioPayload {
    let lufs = labeled_value(stderr, "I:", "LUFS");
    let lra = labeled_value(stderr, "LRA:", "LU").unwrap_or(0.0);
    let true_peak = labeled_value(stderr, "Peak:", "dBFS").unwrap_or(-99.0);

    let rms_overall = section_value(stderr, "Overall", "RMS level dB:");
    let peak_overall = section_value(stderr, "Overall", "Peak level dB:").unwrap_or(true_peak);
    let dynamic_range_db = match rms_overall {
        Some(rms) => (peak_overall - rms).max(0.0),
        None => 0.0,
    };

    let rms_ch1 = section_value(stderr, "Channel: 1", "RMS level dB:");
    let rms_ch2 = section_value(stderr, "Channel: 2", "RMS level dB:");
    let stereo_phase = match (rms_ch1, rms_ch2) {
        (Some(l), Some(r)) => (1.0 - ((l - r).abs() / 20.0)).clamp(-1.0, 1.0),
        _ => 1.0,
    };

    let speech_spans = speech_spans(stderr, window_start_s, duration_s);

    let clarity = if stoi_enabled && !speech_spans.is_empty() {
        rms_overall.map(|rms| ((rms - NOISE_FLOOR_DB) / 25.0).clamp(0.0, 1.0))
    } else {
        None
    };

    AudioPayload {
        lufs_integrated: lufs.unwrap_or(-70.0),
        loudness_range: lra,
        true_peak_dbtp: true_peak,
        dynamic_range_db,
        speech_spans,
        clarity,
        stereo_phase,
        lufs_trace: if lufs.is_some() { 1.0 } else { 0.0 },
    }
}

/// Speech spans: the complement of detected silence within the window,
/// shifted back into video time.
fn speech_spans(stderr: &str, window_start_s: f64, duration_s: f64) -> Vec<SpeechSpan> {
    let mut silences: Vec<(f64, f64)> = Vec::new();
    let mut open: Option<f64> = None;
    for line in stderr.lines() {
        if let Some(value) = line.split("silence_start:").nth(1) {
            open = value.trim().split_whitespace().next().and_then(|v| v.parse().ok());
        } else if let Some(value) = line.split("silence_end:").nth(1) {
            let end: Option<f64> =
                value.trim().split_whitespace().next().and_then(|v| v.parse().ok());
            if let (Some(start), Some(end)) = (open.take(), end) {
                silences.push((start.max(0.0), end.min(duration_s)));
            }
        }
    }
    if let Some(start) = open {
        silences.push((start.max(0.0), duration_s));
    }
    silences.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut spans = Vec::new();
    let mut cursor = 0.0f64;
    for (start, end) in silences {
        if start > cursor {
            spans.push(SpeechSpan {
                start_s: window_start_s + cursor,
                end_s: window_start_s + start,
            });
        }
        cursor = cursor.max(end);
    }
    if cursor < duration_s {
        spans.push(SpeechSpan { start_s: window_start_s + cursor, end_s: window_start_s + duration_s });
    }
    spans.retain(|s| s.duration_s() > 0.05);
    spans
}

/// Find `label <number> <unit>` in ebur128 summary output.
fn labeled_value(text: &str, label: &str, unit: &str) -> Option<f64> {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(label) {
            let rest = rest.trim();
            if let Some(value) = rest.strip_suffix(unit) {
                if let Ok(parsed) = value.trim().parse() {
                    return Some(parsed);
                }
            }
        }
    }
    None
}

/// Find `key <number>` inside a named astats section.
fn section_value(text: &str, section: &str, key: &str) -> Option<f64> {
    let mut in_section = false;
    for line in text.lines() {
        if line.contains(section) {
            in_section = true;
            continue;
        }
        if in_section {
            // Section ends at the next section header.
            if line.contains("Channel:") || line.contains("Overall") {
                in_section = false;
                if line.contains(section) {
                    in_section = true;
                }
                continue;
            }
            if let Some(rest) = line.split(key).nth(1) {
                return rest.trim().split_whitespace().next().and_then(|v| v.parse().ok());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STDERR: &str = r#"
[silencedetect @ 0x1] silence_start: 2.5
[silencedetect @ 0x1] silence_end: 4.0 | silence_duration: 1.5
[Parsed_astats_2 @ 0x2] Channel: 1
[Parsed_astats_2 @ 0x2] RMS level dB: -20.1
[Parsed_astats_2 @ 0x2] Peak level dB: -4.0
[Parsed_astats_2 @ 0x2] Channel: 2
[Parsed_astats_2 @ 0x2] RMS level dB: -21.3
[Parsed_astats_2 @ 0x2] Peak level dB: -4.2
[Parsed_astats_2 @ 0x2] Overall
[Parsed_astats_2 @ 0x2] RMS level dB: -20.7
[Parsed_astats_2 @ 0x2] Peak level dB: -4.0
[Parsed_ebur128_0 @ 0x3] Summary:

  Integrated loudness:
    I:         -18.2 LUFS
    Threshold: -28.9 LUFS

  Loudness range:
    LRA:         5.6 LU

  True peak:
    Peak:       -1.4 dBFS
"#;

    #[test]
    fn parses_loudness_summary() {
        let payload = parse_measurement(SAMPLE_STDERR, 10.0, 6.0, true);
        assert_eq!(payload.lufs_integrated, -18.2);
        assert_eq!(payload.loudness_range, 5.6);
        assert_eq!(payload.true_peak_dbtp, -1.4);
        assert_eq!(payload.lufs_trace, 1.0);
    }

    #[test]
    fn speech_spans_complement_silence() {
        let payload = parse_measurement(SAMPLE_STDERR, 10.0, 6.0, true);
        // Silence at [2.5, 4.0] inside a 6s window -> speech [0,2.5] and [4,6],
        // both shifted by the 10s window start.
        assert_eq!(payload.speech_spans.len(), 2);
        assert!((payload.speech_spans[0].start_s - 10.0).abs() < 1e-9);
        assert!((payload.speech_spans[0].end_s - 12.5).abs() < 1e-9);
        assert!((payload.speech_spans[1].start_s - 14.0).abs() < 1e-9);
        assert!((payload.speech_spans[1].end_s - 16.0).abs() < 1e-9);
    }

    #[test]
    fn clarity_reflects_rms_over_noise_floor() {
        let payload = parse_measurement(SAMPLE_STDERR, 0.0, 6.0, true);
        // (-20.7 + 35) / 25
        let expected = (35.0 - 20.7) / 25.0;
        assert!((payload.clarity.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn clarity_absent_when_disabled() {
        let payload = parse_measurement(SAMPLE_STDERR, 0.0, 6.0, false);
        assert!(payload.clarity.is_none());
    }

    #[test]
    fn fully_silent_window_has_no_speech() {
        let stderr = "[silencedetect @ 0x1] silence_start: 0.0\n";
        let payload = parse_measurement(stderr, 0.0, 4.0, true);
        assert!(payload.speech_spans.is_empty());
        assert!(payload.clarity.is_none());
        assert_eq!(payload.lufs_trace, 0.0);
    }

    #[test]
    fn stereo_phase_tracks_channel_imbalance() {
        let payload = parse_measurement(SAMPLE_STDERR, 0.0, 6.0, true);
        let expected = 1.0 - (21.3f64 - 20.1).abs() / 20.0;
        assert!((payload.stereo_phase - expected).abs() < 1e-9);
    }
}
