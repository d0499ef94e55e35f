//! Handles for long-running node tasks

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug};

use crate::error::{NodeError, NodeResult};

/// Owner of a spawned background loop
///
/// Loops observe cancellation only between iterations, so an iteration that
/// already started always completes.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `make(token)` on the runtime inside `span`
    pub fn spawn<F, Fut>(name: &'static str, span: Span, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with_token(name, span, CancellationToken::new(), make)
    }

    /// Spawn with an existing token, so other owners can cancel the loop too
    pub fn spawn_with_token<F, Fut>(
        name: &'static str,
        span: Span,
        token: CancellationToken,
        make: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let join = tokio::spawn(make(token.clone()).instrument(span));
        Self { name, token, join }
    }

    /// Name of the loop, for logging
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A clone of the cancellation token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request cancellation without waiting
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait for its current iteration to finish
    pub async fn stop(self) -> NodeResult<()> {
        self.token.cancel();
        let result = self.join.await;
        debug!(task = self.name, "Task stopped");
        result.map_err(|e| NodeError::Task(format!("{}: {}", self.name, e)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_loop_exit() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();

        let handle = TaskHandle::spawn("ticker", Span::none(), move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(!handle.is_finished());
        assert_eq!(handle.name(), "ticker");

        handle.stop().await.unwrap();
        assert_eq!(iterations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_reports_error() {
        let handle = TaskHandle::spawn("boom", Span::none(), |_token| async move {
            let fail = true;
            if fail {
                panic!("boom");
            }
        });
        let err = handle.stop().await.unwrap_err();
        assert!(matches!(err, NodeError::Task(_)));
    }
}
