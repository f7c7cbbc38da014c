//! Scoped collector for side-effect tasks.
//!
//! A handler that needs to kick off work which must not delay its own
//! response (notifying other channels, publishing an event) pushes a future
//! here. The invocation's entry point calls [`DeferredWork::drain`] after the
//! response has been sent and before the invocation returns, so nothing is
//! left running once the unit of work is over.

use std::future::Future;
use std::pin::Pin;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::warn;

use crate::errors::CoreError;

type Task = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'static>>;

/// Collects futures to await at the end of an invocation.
#[derive(Default)]
pub struct DeferredWork {
    tasks: Mutex<Vec<(&'static str, Task)>>,
}

impl DeferredWork {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a labelled task.
    pub fn defer<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.tasks.lock().push((label, Box::pin(task)));
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Await every queued task concurrently. Failures are logged, not
    /// propagated; returns how many tasks failed.
    pub async fn drain(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return 0;
        }
        let (labels, futures): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = join_all(futures).await;
        let mut failed = 0;
        for (label, result) in labels.into_iter().zip(results) {
            if let Err(err) = result {
                failed += 1;
                warn!(task = label, error = %err, "deferred task failed");
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_runs_all_tasks() {
        let work = DeferredWork::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            work.defer("bump", async move {
                let _ = c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(work.len(), 3);
        assert_eq!(work.drain().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(work.is_empty());
    }

    #[tokio::test]
    async fn failures_are_counted_not_propagated() {
        let work = DeferredWork::new();
        work.defer("ok", async { Ok(()) });
        work.defer("bad", async { Err(CoreError::transport("down")) });
        assert_eq!(work.drain().await, 1);
    }

    #[tokio::test]
    async fn drain_on_empty_is_noop() {
        let work = DeferredWork::new();
        assert_eq!(work.drain().await, 0);
    }
}
