//! Fixed-width pool executing batches of remote calls.
//!
//! Each batch is a barrier: [`WorkerPool::run_batch`] returns only once every task it started has
//! finished. The pool is reused across batches and never holds results between them.

use std::future::Future;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// Outcome of one item of a batch.
#[derive(Debug)]
pub enum BatchOutcome<T, R> {
    Done(R),
    /// Cancellation was requested before the item was dispatched
    NotStarted(T),
}

#[derive(Debug)]
pub struct WorkerPool {
    throttle: std::sync::Arc<throttle::Throttle>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// # Panics
    ///
    /// If `num_connections` is 0, callers validate their settings first.
    #[must_use]
    pub fn new(num_connections: usize, cancel: CancellationToken) -> Self {
        assert!(num_connections > 0);
        Self {
            throttle: std::sync::Arc::new(throttle::Throttle::new(num_connections)),
            cancel,
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `task` for every item with at most `num_connections` running at once and waits for
    /// all of them. Outcomes come back in completion order.
    pub async fn run_batch<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        task: F,
    ) -> anyhow::Result<Vec<BatchOutcome<T, R>>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let mut outcomes = Vec::with_capacity(items.len());
        let mut join_set = tokio::task::JoinSet::new();
        let mut pending = items.into_iter();
        for item in pending.by_ref() {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => None,
                permit = self.throttle.permit() => Some(permit),
            };
            let permit = match permit {
                Some(permit) if !self.cancel.is_cancelled() => permit,
                _ => {
                    tracing::debug!("cancelled, not dispatching remaining batch items");
                    outcomes.push(BatchOutcome::NotStarted(item));
                    break;
                }
            };
            let task = task.clone();
            join_set.spawn(async move {
                let _permit = permit;
                task(item).await
            });
        }
        outcomes.extend(pending.map(BatchOutcome::NotStarted));
        while let Some(res) = join_set.join_next().await {
            let result = res.context("worker task failed to complete")?;
            outcomes.push(BatchOutcome::Done(result));
        }
        Ok(outcomes)
    }
}
