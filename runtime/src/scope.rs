//! Cancellable ownership scope for subscription and timer tasks.
//!
//! Every live subscription (reservation watches, presence watches, viewer
//! counters) runs as a spawned task that must not outlive the component that
//! created it. Instead of hand-tracking unsubscribe closures, each component
//! owns a [`TaskScope`]: tasks are spawned into the scope, and teardown is a
//! single [`TaskScope::cancel`] call, which also happens automatically when
//! the scope is dropped.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

/// Owns a set of spawned tasks and aborts them all on cancel or drop.
///
/// # Example
///
/// ```rust,no_run
/// use garderobe_runtime::scope::TaskScope;
///
/// # async fn example() {
/// let scope = TaskScope::new();
/// scope.spawn(async {
///     // runs until the scope is cancelled
/// });
/// scope.cancel(); // single teardown call
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TaskScope {
    handles: Mutex<Vec<JoinHandle<()>>>,
    cancelled: AtomicBool,
}

impl TaskScope {
    /// Create an empty scope.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Spawn a task owned by this scope.
    ///
    /// If the scope is already cancelled the future is dropped without
    /// running.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.cancelled.load(Ordering::Acquire) {
            tracing::debug!("TaskScope already cancelled, dropping task");
            return;
        }

        let handle = tokio::spawn(future);

        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // A cancel may have raced with the spawn above
        if self.cancelled.load(Ordering::Acquire) {
            handle.abort();
            return;
        }

        // Keep the list from growing unboundedly in long-lived scopes
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every task owned by this scope.
    ///
    /// Idempotent: later calls (and the drop) are no-ops.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let count = handles.len();
        for handle in handles.drain(..) {
            handle.abort();
        }

        if count > 0 {
            tracing::debug!(tasks = count, "TaskScope cancelled");
        }
    }

    /// Whether this scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel();
    }
}
