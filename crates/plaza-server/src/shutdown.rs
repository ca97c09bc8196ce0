//! Graceful shutdown: one cancellation token plus a tracker for session tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time allowed for sessions to say goodbye.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown of the listener and every live session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wrap a session future so shutdown waits for it.
    pub fn track<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Sessions still running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` for the listener and all sessions.
    ///
    /// Sessions leave the room (broadcasting `leave`) and close their sockets
    /// before the wait completes. Anything still running afterwards is
    /// abandoned with a warning.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.sessions.close();
        info!(
            task_count = handles.len(),
            sessions = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.sessions.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                sessions = self.sessions.len(),
                "shutdown timed out after {timeout:?}, some tasks may still be running"
            );
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.active_sessions(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_reaches_tokens() {
        let coord = ShutdownCoordinator::default();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tasks_and_sessions() {
        let coord = ShutdownCoordinator::new();

        let token = coord.token();
        let listener = tokio::spawn(async move { token.cancelled().await });

        let token = coord.token();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        let _session = tokio::spawn(coord.track(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        }));
        assert_eq!(coord.active_sessions(), 1);

        coord.graceful_shutdown(vec![listener], None).await;
        assert!(done_rx.try_recv().is_ok());
        assert_eq!(coord.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();

        // Ignores cancellation
        let stuck = tokio::spawn(coord.track(tokio::time::sleep(Duration::from_secs(300))));

        coord.graceful_shutdown(Vec::new(), Some(Duration::from_millis(100))).await;
        assert!(coord.is_shutting_down());
        assert!(!stuck.is_finished());
        stuck.abort();
    }
}
