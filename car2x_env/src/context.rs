//! Core environment context trait for the vehicle agent.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

use crate::task::{cancel_pair, CancelToken, TaskHandle};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so the beacon scheduler, the fix
/// pump and the inbound receive loop can run against the system clock in
/// production and against a virtual clock in simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `SystemTime`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait V2xContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time.
    ///
    /// Fix freshness and CAM timestamps are derived from this clock.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a background task that observes a cancellation token.
    ///
    /// The returned handle cancels the task when `cancel()` is called or
    /// when the handle is dropped.
    fn spawn_cancellable<F, Fut>(&self, name: &str, task: F) -> TaskHandle
    where
        Self: Sized,
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, token) = cancel_pair();
        let join = self.spawn(name, task(token));
        TaskHandle::new(name, cancel, join)
    }
}
