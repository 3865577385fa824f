//! Subscription handles for live availability watches.

use garderobe_runtime::TaskScope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// How long a watch task waits before reopening a failed change feed.
pub(crate) const WATCH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Handle to a live subscription.
///
/// The subscription's task is owned by the handle; dropping it or calling
/// [`WatchHandle::cancel`] tears the subscription down. No callbacks are
/// invoked after cancellation.
#[derive(Debug)]
pub struct WatchHandle {
    scope: TaskScope,
}

impl WatchHandle {
    pub(crate) const fn new(scope: TaskScope) -> Self {
        Self { scope }
    }

    /// Tear down the subscription.
    pub fn cancel(&self) {
        self.scope.cancel();
    }
}

/// Handle to a live "wanted by others" subscription.
///
/// Like [`WatchHandle`], but additionally exposes [`reevaluate`] so the
/// composition layer can force a recompute when the externally supplied
/// locked set changes: presence documents themselves have not changed in
/// that case, so no store notification will arrive.
///
/// [`reevaluate`]: PresenceWatchHandle::reevaluate
#[derive(Debug)]
pub struct PresenceWatchHandle {
    scope: TaskScope,
    nudge: Arc<Notify>,
}

impl PresenceWatchHandle {
    pub(crate) fn new(scope: TaskScope, nudge: Arc<Notify>) -> Self {
        Self { scope, nudge }
    }

    /// Force a recompute of the wanted set against the current locked set.
    pub fn reevaluate(&self) {
        self.nudge.notify_one();
    }

    /// A clonable trigger for [`PresenceWatchHandle::reevaluate`].
    pub(crate) fn nudger(&self) -> Arc<Notify> {
        Arc::clone(&self.nudge)
    }

    /// Tear down the subscription.
    pub fn cancel(&self) {
        self.scope.cancel();
    }
}
