// ABOUTME: Bounded parallel execution of graph nodes
// ABOUTME: Spawns node jobs that each hold a semaphore permit while they run

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct TaskScheduler {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

#[derive(Debug, Clone)]
pub struct ResourceStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub active_tasks: usize,
}

impl TaskScheduler {
    /// Create a new task scheduler with specified concurrency limit
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Spawn `job`, letting it run once a permit is free.
    ///
    /// At most `max_concurrent` spawned jobs run at a time. A job that panics
    /// surfaces as a `JoinError` from the returned handle.
    pub fn spawn<Fut, R>(&self, job: Fut) -> JoinHandle<R>
    where
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        debug!(
            "Spawning job ({} of {} permits free)",
            semaphore.available_permits(),
            self.max_concurrent
        );

        tokio::spawn(async move {
            // the semaphore is never closed, so the permit is always granted
            let _permit = semaphore.acquire_owned().await;
            job.await
        })
    }

    /// Get current resource usage statistics
    pub fn get_resource_stats(&self) -> ResourceStats {
        ResourceStats {
            max_concurrent: self.max_concurrent,
            available_permits: self.semaphore.available_permits(),
            active_tasks: self.max_concurrent - self.semaphore.available_permits(),
        }
    }
}

impl ResourceStats {
    pub fn utilization_percentage(&self) -> f64 {
        if self.max_concurrent == 0 {
            0.0
        } else {
            (self.active_tasks as f64 / self.max_concurrent as f64) * 100.0
        }
    }
}
