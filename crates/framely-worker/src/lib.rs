//! Video analysis worker.
//!
//! Consumes analyze jobs from the queue and drives the full pipeline:
//! source resolution, prep, the per-shot detector DAG under a bounded GPU
//! pool with an OOM fallback ladder, merge/assembly, the coverage gate,
//! and atomic bundle persistence.

pub mod config;
pub mod coverage;
pub mod error;
pub mod executor;
pub mod ladder;
pub mod merge;
pub mod pool;
pub mod processor;
pub mod scheduler;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use ladder::{FallbackLadder, FiredStep, LadderAction};
pub use pool::{GpuPool, GpuPermit};
pub use scheduler::{JobRun, NoopProgress, ProgressSink, Scheduler, ShotOutcome};
