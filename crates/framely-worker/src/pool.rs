//! Bounded-concurrency admission for GPU-class detectors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
#[error("GPU pool closed")]
pub struct PoolClosed;

/// The single shared contention point for GPU-using detectors.
///
/// Wraps a fair tokio semaphore: acquisition is FIFO, waiting is
/// cancel-safe (an aborted waiter never holds a permit), and permits are
/// released on every exit path because [`GpuPermit`] releases on drop.
#[derive(Clone)]
pub struct GpuPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
    high_water: Arc<AtomicUsize>,
}

/// An admission permit; dropping it returns capacity to the pool.
pub struct GpuPermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for GpuPermit {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GpuPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
            high_water: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a permit. Both gpu_heavy and gpu_light hold one permit;
    /// tuning is done by setting the pool capacity.
    pub async fn acquire(&self) -> Result<GpuPermit, PoolClosed> {
        let permit =
            Arc::clone(&self.semaphore).acquire_owned().await.map_err(|_| PoolClosed)?;
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        Ok(GpuPermit { _permit: permit, in_use: Arc::clone(&self.in_use) })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Peak concurrent permits observed since construction.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}
