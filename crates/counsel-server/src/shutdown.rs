//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Long-running tasks (the HTTP server, bus workers) are spawned through
//! [`ShutdownCoordinator::spawn`] so shutdown can wait for them.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::graceful_shutdown`] waits by default.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared cancellation plus the set of tasks to wait for.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh token.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a coordinator over an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that shutdown will wait for. The task is expected to
    /// watch [`token`](Self::token) and return when it fires.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.tasks.lock().push((name, handle));
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel the token.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` for every tracked task. Tasks still
    /// running afterwards are aborted.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(
            task_count = tasks.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for (name, result) in names.iter().zip(results) {
                    if let Err(e) = result {
                        warn!(task = *name, error = %e, "task ended abnormally");
                    }
                }
            }
            Err(_) => {
                warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn shutdown_propagates_to_tokens() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled() && t2.is_cancelled());
    }

    #[test]
    fn with_token_shares_cancellation() {
        let token = CancellationToken::new();
        let coord = ShutdownCoordinator::with_token(token.clone());
        token.cancel();
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        coord.spawn("worker", async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(coord.task_count(), 1);

        coord.graceful_shutdown(None).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(coord.task_count(), 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        coord.spawn("stubborn", async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let started = std::time::Instant::now();
        coord.graceful_shutdown(Some(Duration::from_millis(100))).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(coord.is_shutting_down());
    }
}
