//! Ephemeral "N people looking at this now" counter.
//!
//! Purely advisory: no ownership checks, no TTL, no locking semantics, and
//! excluded from availability computation. Rows are created on product-page
//! mount and deleted on unmount or navigate-away. Best-effort by nature:
//! since a crashed or force-closed client leaves a stale row until an
//! external sweep collects it.

use crate::error::AvailabilityError;
use crate::types::{ProductId, SessionContext, Viewer, collections};
use crate::watch::{WATCH_RETRY_DELAY, WatchHandle};
use futures::StreamExt;
use garderobe_core::document::Document;
use garderobe_core::environment::Clock;
use garderobe_core::store::{DocumentStore, DocumentStoreError};
use garderobe_runtime::TaskScope;
use std::sync::Arc;

/// Counts viewer-sessions currently on a product's detail page.
#[derive(Clone)]
pub struct ViewerCounter {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    session: SessionContext,
}

impl ViewerCounter {
    /// Create a counter bound to one session's identity.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        session: SessionContext,
    ) -> Self {
        Self {
            store,
            clock,
            session,
        }
    }

    /// Record this session as viewing the product.
    ///
    /// # Errors
    ///
    /// Returns the store failure if the write did not land.
    pub async fn add_viewer(&self, product: &ProductId) -> Result<(), AvailabilityError> {
        let viewer = Viewer {
            product_id: product.clone(),
            viewer_id: self.session.viewer.clone(),
            last_seen: self.clock.now(),
        };
        let key = Viewer::storage_key(product, &self.session.viewer);
        self.store
            .put(collections::VIEWERS, &key, viewer.encode()?)
            .await?;
        Ok(())
    }

    /// Remove this session's viewer row (page-lifecycle driven,
    /// best-effort).
    ///
    /// # Errors
    ///
    /// Returns the store failure if the delete did not land; callers on
    /// navigate-away paths typically just log it.
    pub async fn remove_viewer(&self, product: &ProductId) -> Result<(), AvailabilityError> {
        let key = Viewer::storage_key(product, &self.session.viewer);
        self.store.delete(collections::VIEWERS, &key).await?;
        Ok(())
    }

    /// Count viewers currently recorded for the product.
    ///
    /// # Errors
    ///
    /// Returns the store failure if the query failed.
    pub async fn viewer_count(&self, product: &ProductId) -> Result<usize, AvailabilityError> {
        let rows = self
            .store
            .query_prefix(collections::VIEWERS, &Viewer::product_prefix(product))
            .await?;
        Ok(rows.len())
    }

    /// Subscribe to the viewer count for one product.
    ///
    /// Invokes `callback` with a fresh count once on subscription and after
    /// every change to the product's viewer rows.
    pub fn subscribe_count<F>(&self, product: &ProductId, callback: F) -> WatchHandle
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let scope = TaskScope::new();
        let counter = self.clone();
        let product = product.clone();

        scope.spawn(async move {
            let prefix = Viewer::product_prefix(&product);
            loop {
                let mut changes = match counter.store.watch(collections::VIEWERS, &prefix).await {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::warn!(%error, "viewer watch failed to open, retrying");
                        tokio::time::sleep(WATCH_RETRY_DELAY).await;
                        continue;
                    },
                };

                counter.emit_count(&product, &callback).await;

                while let Some(item) = changes.next().await {
                    match item {
                        Ok(_) => counter.emit_count(&product, &callback).await,
                        Err(DocumentStoreError::Lagged { missed }) => {
                            tracing::warn!(missed, "viewer watch lagged, recomputing");
                            counter.emit_count(&product, &callback).await;
                        },
                        Err(error) => {
                            tracing::warn!(%error, "viewer watch errored, reopening");
                            break;
                        },
                    }
                }

                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        });

        WatchHandle::new(scope)
    }

    async fn emit_count<F>(&self, product: &ProductId, callback: &F)
    where
        F: Fn(usize) + Send + Sync,
    {
        match self.viewer_count(product).await {
            Ok(count) => callback(count),
            Err(error) => tracing::warn!(%error, "failed to recompute viewer count"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ViewerId;
    use garderobe_memstore::MemoryStore;
    use garderobe_testing::ManualClock;

    fn counter_for(store: &MemoryStore, clock: &ManualClock, viewer: &str) -> ViewerCounter {
        ViewerCounter::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            SessionContext::new(crate::types::HolderId::new(viewer), ViewerId::new(viewer)),
        )
    }

    fn test_setup() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(garderobe_testing::test_clock().now());
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn count_tracks_add_and_remove() {
        let (store, clock) = test_setup();
        let first = counter_for(&store, &clock, "v1");
        let second = counter_for(&store, &clock, "v2");
        let product = ProductId::new("g-1");

        first.add_viewer(&product).await.unwrap();
        second.add_viewer(&product).await.unwrap();
        assert_eq!(first.viewer_count(&product).await.unwrap(), 2);

        // Re-adding the same viewer-session does not double count
        first.add_viewer(&product).await.unwrap();
        assert_eq!(first.viewer_count(&product).await.unwrap(), 2);

        second.remove_viewer(&product).await.unwrap();
        assert_eq!(first.viewer_count(&product).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counts_are_per_product() {
        let (store, clock) = test_setup();
        let viewer = counter_for(&store, &clock, "v1");

        viewer.add_viewer(&ProductId::new("g-1")).await.unwrap();
        viewer.add_viewer(&ProductId::new("g-2")).await.unwrap();

        assert_eq!(viewer.viewer_count(&ProductId::new("g-1")).await.unwrap(), 1);
        assert_eq!(viewer.viewer_count(&ProductId::new("g-2")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn subscribe_count_observes_changes() {
        let (store, clock) = test_setup();
        let watcher = counter_for(&store, &clock, "v1");
        let other = counter_for(&store, &clock, "v2");
        let product = ProductId::new("g-1");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _watch = watcher.subscribe_count(&product, move |count| {
            let _ = tx.send(count);
        });

        // Initial emission
        let first = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, 0);

        other.add_viewer(&product).await.unwrap();
        let next = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, 1);
    }
}
