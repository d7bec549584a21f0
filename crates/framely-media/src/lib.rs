//! FFmpeg CLI wrappers, prep stage and detector adapters.
//!
//! The prep stage decodes keyframes, extracts audio and segments shots;
//! the `detect` module exposes every analysis capability behind the
//! uniform [`detect::Detector`] interface consumed by the scheduler.

pub mod detect;
pub mod error;
pub mod fetch;
pub mod ffmpeg;
pub mod prep;
pub mod probe;
pub mod shots;
pub mod ssim;

pub use detect::{
    calibration_table, coverage_fraction, cross_pass_nms, provenance_for, sr_frame_paths,
    tile_grid, Detector, DetectorCtx, DetectorSet, Tile,
};
pub use error::{MediaError, MediaResult};
pub use prep::{prepare, PrepOutput};
pub use probe::{probe, VideoInfo};
pub use shots::segment_shots;
pub use ssim::{ssim, ssim_files};
