//! Bounded worker pool
//!
//! A pool hands out at most `workers` concurrent slots. Tasks are spawned on
//! the tokio runtime only after they obtained a slot, so a fan-out loop that
//! submits thousands of parts never has more than `workers` of them running.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_WORKERS;
use crate::error::{Error, Result};

/// Fixed-size pool of task slots
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool with `workers` slots
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config(
                "worker pool needs at least one worker".into(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            cancel: CancellationToken::new(),
        })
    }

    /// Number of slots
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Slots not taken by a running task
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Token cancelled when the pool is cancelled
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting tasks and signal running tasks to wind down
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for a free slot, then run `task` on it
    ///
    /// Fails with `Error::Cancelled` if `token` or the pool is cancelled first.
    pub async fn submit<F>(&self, token: &CancellationToken, task: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            _ = token.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| Error::Cancelled)?
            }
        };

        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await;
        }))
    }

    /// Run `task` if a slot is free right now, else `Error::PoolSaturated`
    pub fn try_submit<F>(&self, task: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => Error::PoolSaturated(self.workers),
                TryAcquireError::Closed => Error::Cancelled,
            })?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await;
        }))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
            workers: DEFAULT_WORKERS,
            cancel: CancellationToken::new(),
        }
    }
}

/// Wait for every spawned task; panicked tasks come back as errors
pub(crate) async fn join_all(handles: Vec<JoinHandle<()>>) -> Vec<Error> {
    futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| joined.err())
        .map(|e| Error::General(format!("worker task failed: {e}")))
        .collect()
}
