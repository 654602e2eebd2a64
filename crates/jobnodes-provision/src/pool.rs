//! Bounded worker pool for background node creation.
//!
//! Tasks are spawned on the tokio runtime captured at construction and
//! gated by a semaphore, so at most `size` creations run at once and a
//! burst of requests never fans out into unbounded concurrent work.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool on the current tokio runtime.
    pub fn new(size: usize) -> ProvisionResult<Self> {
        let handle = Handle::try_current().map_err(|e| ProvisionError::Submit(e.to_string()))?;
        Ok(Self::with_handle(handle, size))
    }

    /// Create a pool on an explicit runtime handle.
    pub fn with_handle(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Queue `task`. It starts once a worker slot is free.
    pub fn submit<F, T>(&self, task: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            // The semaphore is never closed; a closed pool drops the task.
            let _permit = permits.acquire_owned().await.ok()?;
            Some(task.await)
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Worker slots free right now.
    pub fn idle_workers(&self) -> usize {
        let idle = self.permits.available_permits();
        debug!(idle, size = self.size, "worker pool status");
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let pool = WorkerPool::new(2).unwrap();
        let result = pool.submit(async { 21 * 2 }).await.unwrap();
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn bounds_concurrency() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.idle_workers(), 2);
    }

    #[test]
    fn new_requires_runtime() {
        assert!(matches!(WorkerPool::new(1), Err(ProvisionError::Submit(_))));
    }

    #[test]
    fn zero_size_is_clamped() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let pool = WorkerPool::with_handle(rt.handle().clone(), 0);
        assert_eq!(pool.size(), 1);
    }
}
