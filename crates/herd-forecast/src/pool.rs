//! Bounded worker pool for CPU-bound simulation runs.
//!
//! A fixed number of permits is shared by every job; each task holds one
//! permit for as long as it executes on tokio's blocking thread pool.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{ForecastError, Result};

/// Shared, bounded pool. Cloning shares the same capacity.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on a blocking worker once a permit is free.
    ///
    /// The permit moves into the worker, so dropping the returned future
    /// abandons the result without releasing capacity before the task ends.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ForecastError::Pool(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "worker task did not complete");
            if e.is_panic() {
                ForecastError::Pool("worker panicked".into())
            } else {
                ForecastError::Pool(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_never_exceeds_size() {
        let pool = WorkerPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    pool.execute(move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();

        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_panic_maps_to_pool_error() {
        let pool = WorkerPool::new(1);
        let err = pool
            .execute(|| -> u32 { panic!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::Pool(_)));
        // The permit is released even though the task panicked.
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
