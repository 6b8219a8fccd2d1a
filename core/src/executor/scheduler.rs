use std::future::Future;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ExecutorError;

use super::types::TaskOutcome;

/// Engine-wide bound on in-flight executor/handler calls.
///
/// Batch mode and graph mode share one limiter, so the bound holds across
/// both. A permit is held only for the duration of a single call; waiting on
/// dependencies or retry delays never holds one.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ExecutorError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::Runner("semaphore closed unexpectedly".into()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// Execute a single batch of tasks concurrently
///
/// Every task in the batch is submitted at once; the bound on simultaneous
/// executor calls is enforced by the [`ConcurrencyLimiter`] inside
/// `executor_fn`. Outcomes are returned in submission order regardless of
/// completion order.
pub async fn execute_batch_parallel<F, Fut>(task_ids: &[String], mut executor_fn: F) -> Vec<TaskOutcome>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = TaskOutcome>,
{
    let mut futs: FuturesUnordered<_> = FuturesUnordered::new();

    for (position, id) in task_ids.iter().enumerate() {
        let fut = executor_fn(id);
        futs.push(async move { (position, fut.await) });
    }

    let mut results = Vec::with_capacity(task_ids.len());
    while let Some(res) = futs.next().await {
        results.push(res);
    }

    results.sort_by_key(|(position, _)| *position);
    results.into_iter().map(|(_, outcome)| outcome).collect()
}
