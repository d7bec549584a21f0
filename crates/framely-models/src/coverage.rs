//! Coverage accounting and quality-gate thresholds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spatial coverage: fraction of pixels covered by the union of tile
/// placements across analyzed frames.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpatialCoverage {
    pub tile_size: u32,
    pub stride: u32,
    pub sr_used: bool,
    pub pixels_covered_pct: f64,
    pub min_detectable_px: u32,
}

/// Temporal coverage: analyzed frames over total frames.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemporalCoverage {
    pub frame_stride: u32,
    pub frames_analyzed_pct: f64,
}

/// Audio coverage: loudness trace and speech-clarity coverage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioCoverage {
    /// Fraction of audio duration with a valid loudness sample.
    pub lufs_trace_pct: f64,
    /// Fraction of speech-classified audio with a clarity score.
    /// 100.0 by convention when no speech was classified.
    pub stoi_pct: f64,
}

/// Aggregated coverage for one job; monotonic while the job runs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoverageReport {
    pub spatial: SpatialCoverage,
    pub temporal: TemporalCoverage,
    pub audio: AudioCoverage,
}

/// Quality-gate thresholds applied to a finished coverage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoverageThresholds {
    pub frames_analyzed_pct: f64,
    pub lufs_trace_pct: f64,
    pub stoi_pct: f64,
    pub min_detectable_px: u32,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            frames_analyzed_pct: 99.0,
            lufs_trace_pct: 100.0,
            stoi_pct: 90.0,
            min_detectable_px: 8,
        }
    }
}

impl CoverageThresholds {
    /// Evaluate the gate, returning every threshold that failed.
    pub fn violations(&self, report: &CoverageReport) -> Vec<String> {
        let mut out = Vec::new();
        if report.temporal.frames_analyzed_pct < self.frames_analyzed_pct {
            out.push(format!(
                "frames_analyzed_pct {:.1} below threshold {:.1}",
                report.temporal.frames_analyzed_pct, self.frames_analyzed_pct
            ));
        }
        if report.audio.lufs_trace_pct < self.lufs_trace_pct {
            out.push(format!(
                "lufs_trace_pct {:.1} below threshold {:.1}",
                report.audio.lufs_trace_pct, self.lufs_trace_pct
            ));
        }
        if report.audio.stoi_pct < self.stoi_pct {
            out.push(format!(
                "stoi_pct {:.1} below threshold {:.1}",
                report.audio.stoi_pct, self.stoi_pct
            ));
        }
        if report.spatial.min_detectable_px > self.min_detectable_px {
            out.push(format!(
                "min_detectable_px {} above threshold {}",
                report.spatial.min_detectable_px, self.min_detectable_px
            ));
        }
        out
    }

    pub fn passes(&self, report: &CoverageReport) -> bool {
        self.violations(report).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_coverage() -> CoverageReport {
        CoverageReport {
            spatial: SpatialCoverage {
                tile_size: 512,
                stride: 256,
                sr_used: false,
                pixels_covered_pct: 100.0,
                min_detectable_px: 8,
            },
            temporal: TemporalCoverage { frame_stride: 1, frames_analyzed_pct: 100.0 },
            audio: AudioCoverage { lufs_trace_pct: 100.0, stoi_pct: 100.0 },
        }
    }

    #[test]
    fn default_gate_passes_full_coverage() {
        let gate = CoverageThresholds::default();
        assert!(gate.passes(&full_coverage()));
    }

    #[test]
    fn gate_reports_each_violation() {
        let gate = CoverageThresholds::default();
        let mut report = full_coverage();
        report.temporal.frames_analyzed_pct = 80.0;
        report.audio.stoi_pct = 50.0;
        let violations = gate.violations(&report);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("frames_analyzed_pct"));
        assert!(violations[1].contains("stoi_pct"));
    }
}
