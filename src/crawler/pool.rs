//! Bounded concurrency pool
//!
//! Wraps a tokio semaphore and tracks how many callers are waiting for a
//! slot, which the spider consults before declaring every run finished.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// A held pool slot; released on drop
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
}

/// Bounds simultaneous operations; cheap to clone, clones share the bound
#[derive(Debug, Clone)]
pub struct ConcurrencyPool {
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    size: usize,
}

/// Decrements the pending counter even if the acquiring future is dropped
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyPool {
    /// Creates a pool with `size` slots (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            pending: Arc::new(AtomicUsize::new(0)),
            size,
        }
    }

    /// Waits for a free slot
    pub async fn acquire(&self) -> Result<PoolSlot, AcquireError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _guard = PendingGuard(&self.pending);
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(PoolSlot { _permit: permit })
    }

    /// Runs `task` while holding a slot
    pub async fn run<F, T>(&self, task: F) -> Result<T, AcquireError>
    where
        F: Future<Output = T>,
    {
        let _slot = self.acquire().await?;
        Ok(task.await)
    }

    /// Callers currently waiting for a slot
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
