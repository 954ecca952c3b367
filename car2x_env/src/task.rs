//! Cancellable background tasks.
//!
//! A `CancelHandle` / `CancelToken` pair is a one-way latch: once the handle
//! cancels (or is dropped) every token observes it, and it never resets.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Creates a connected cancellation handle and token.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Owner side of a cancellation latch.
///
/// Dropping the handle cancels all tokens.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Creates another token observing this handle.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of a cancellation latch.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns true if the handle cancelled or was dropped.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes once the handle cancels or is dropped.
    pub async fn cancelled(&mut self) {
        // Err means the handle is gone, which counts as cancellation.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Handle to a spawned, cancellable background task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    cancel: CancelHandle,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Wraps a spawned task and the handle its token observes.
    pub fn new(name: &str, cancel: CancelHandle, join: JoinHandle<()>) -> Self {
        Self {
            name: name.to_string(),
            cancel,
            join,
        }
    }

    /// Task name (for logging).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests the task to stop. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(task = %self.name, "cancelling task");
        }
        self.cancel.cancel();
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true if the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancels the task and waits for it to finish.
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                tracing::error!(task = %self.name, "task panicked: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());

        handle.cancel();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let (handle, token) = cancel_pair();
        drop(handle);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_completes() {
        let (handle, mut token) = cancel_pair();
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });

        handle.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_task_handle_shutdown_stops_loop() {
        let (cancel, mut token) = cancel_pair();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
                }
            }
        });

        let handle = TaskHandle::new("looper", cancel, join);
        assert_eq!(handle.name(), "looper");
        handle.shutdown().await;
    }
}
