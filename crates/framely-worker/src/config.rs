//! Worker configuration.

use std::time::Duration;

/// Worker runtime configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum shots analyzed in parallel within a single job
    pub max_shot_parallel: usize,
    /// Per-shot deadline for gpu-class detectors
    pub gpu_deadline: Duration,
    /// Per-shot deadline for cpu-class detectors
    pub cpu_deadline: Duration,
    /// Per-shot deadline for the VL reasoning call
    pub vl_deadline: Duration,
    /// Fraction of shots with internal errors tolerated before the
    /// bundle is marked degraded
    pub internal_error_budget: f64,
    /// Nominal device memory held per pool permit, for the peak estimate
    pub gpu_mem_mb_per_permit: u64,
    /// How often the worker scans for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Interval for status-cache heartbeats while processing
    pub heartbeat_interval: Duration,
    /// How often the stale-job reaper scans the status table
    pub stale_check_interval: Duration,
    /// Heartbeat silence after which a running job counts as stale, seconds
    pub stale_heartbeat_secs: i64,
    /// Grace period for jobs that never heartbeated, seconds
    pub stale_grace_secs: i64,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            max_shot_parallel: 2,
            gpu_deadline: Duration::from_secs(120),
            cpu_deadline: Duration::from_secs(30),
            vl_deadline: Duration::from_secs(60),
            internal_error_budget: 0.2,
            gpu_mem_mb_per_permit: 2048,
            claim_interval: Duration::from_secs(60),
            claim_min_idle: Duration::from_secs(900), // 15 minutes
            heartbeat_interval: Duration::from_secs(30),
            stale_check_interval: Duration::from_secs(60),
            // Three missed heartbeats at the default interval.
            stale_heartbeat_secs: 90,
            stale_grace_secs: 600,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.max_concurrent_jobs),
            max_shot_parallel: std::env::var("WORKER_MAX_SHOT_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.max_shot_parallel),
            gpu_deadline: env_secs("WORKER_GPU_DEADLINE_SECS", base.gpu_deadline),
            cpu_deadline: env_secs("WORKER_CPU_DEADLINE_SECS", base.cpu_deadline),
            vl_deadline: env_secs("WORKER_VL_DEADLINE_SECS", base.vl_deadline),
            internal_error_budget: std::env::var("WORKER_INTERNAL_ERROR_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.internal_error_budget),
            gpu_mem_mb_per_permit: std::env::var("WORKER_GPU_MEM_MB_PER_PERMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.gpu_mem_mb_per_permit),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", base.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", base.claim_min_idle),
            heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS", base.heartbeat_interval),
            stale_check_interval: env_secs("WORKER_STALE_CHECK_SECS", base.stale_check_interval),
            stale_heartbeat_secs: std::env::var("WORKER_STALE_HEARTBEAT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.stale_heartbeat_secs),
            stale_grace_secs: std::env::var("WORKER_STALE_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.stale_grace_secs),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", base.shutdown_timeout),
        }
    }

    /// Deadline for a detector by resource class.
    pub fn deadline_for(&self, class: framely_models::ResourceClass) -> Duration {
        use framely_models::ResourceClass;
        match class {
            ResourceClass::GpuHeavy | ResourceClass::GpuLight => self.gpu_deadline,
            ResourceClass::Cpu => self.cpu_deadline,
            ResourceClass::Io => self.vl_deadline,
        }
    }
}
