//! Best-effort set of detached background tasks.
//!
//! Callers cannot cancel an individual task; the owner drains or aborts the
//! whole set at shutdown.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a detached task. Finished tasks are reaped on the way in.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        while let Some(result) = set.try_join_next() {
            if let Err(e) = result {
                debug!(error = %e, "background task ended abnormally");
            }
        }
        set.spawn(task);
    }

    /// Tasks spawned and not yet reaped.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `grace` for running tasks, then abort the rest.
    ///
    /// Returns the number of tasks aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.lock());
        let finished = tokio::time::timeout(grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }
        let aborted = set.len();
        warn!(aborted, "aborting background tasks after grace period");
        set.shutdown().await;
        aborted
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
