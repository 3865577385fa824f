//! The "in my bag" presence signal per (product, holder).
//!
//! Presence is a *weak* signal by design: it nudges other buyers ("somebody
//! wants this") but never blocks a purchase; only a live reservation may.
//! Rows are idempotent create/delete; entering checkout clears a holder's
//! presence in batch before the reservation is taken out, because presence
//! and reservation are mutually exclusive per holder.

use crate::error::AvailabilityError;
use crate::types::{CartPresence, ProductId, SessionContext, collections, product_segment};
use crate::watch::{PresenceWatchHandle, WATCH_RETRY_DELAY};
use futures::StreamExt;
use futures::future::join_all;
use garderobe_core::document::Document;
use garderobe_core::environment::Clock;
use garderobe_core::store::{DocumentStore, DocumentStoreError};
use garderobe_runtime::TaskScope;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

/// Supplies the current hard-locked set, used to de-duplicate the "wanted"
/// signal against the "locked" signal so a product is never reported as
/// both.
pub type LockedSetFn = Arc<dyn Fn() -> HashSet<ProductId> + Send + Sync>;

/// Owns the "in my bag" signal for one session's holder.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    session: SessionContext,
}

impl PresenceTracker {
    /// Create a tracker bound to one session's identity.
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

    /// Mark the product as present in this holder's bag. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the store failure if the write did not land.
    pub async fn set_present(&self, product: &ProductId) -> Result<(), AvailabilityError> {
        if self.session.holder.is_empty() {
            return Ok(());
        }

        let presence = CartPresence {
            product_id: product.clone(),
            holder_id: self.session.holder.clone(),
            updated_at: self.clock.now(),
        };
        let key = CartPresence::storage_key(product, &self.session.holder);
        self.store
            .put(collections::CART_PRESENCE, &key, presence.encode()?)
            .await?;
        tracing::debug!(%product, holder = %self.session.holder, "presence set");
        Ok(())
    }

    /// Remove the product from this holder's bag signal. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the store failure if the delete did not land.
    pub async fn clear_present(&self, product: &ProductId) -> Result<(), AvailabilityError> {
        if self.session.holder.is_empty() {
            return Ok(());
        }

        let key = CartPresence::storage_key(product, &self.session.holder);
        self.store.delete(collections::CART_PRESENCE, &key).await?;
        tracing::debug!(%product, holder = %self.session.holder, "presence cleared");
        Ok(())
    }

    /// Clear presence for a batch of products, converting bag presence into
    /// reservation intent on checkout entry. Callers follow up with
    /// [`ReservationManager::reserve`].
    ///
    /// Each product is independent; a failure on one does not abort the
    /// others.
    ///
    /// [`ReservationManager::reserve`]: crate::reservations::ReservationManager::reserve
    pub async fn clear_present_batch(&self, products: &[ProductId]) {
        join_all(products.iter().map(|product| async move {
            if let Err(error) = self.clear_present(product).await {
                tracing::warn!(%product, %error, "presence clear failed");
            }
        }))
        .await;
    }

    /// Restore presence for a batch of products, returning released
    /// checkout items to bag state.
    ///
    /// Each product is independent; a failure on one does not abort the
    /// others.
    ///
    /// # Errors
    ///
    /// Returns the first store failure after attempting every product, so
    /// one-shot callers can retry the batch.
    pub async fn set_present_batch(&self, products: &[ProductId]) -> Result<(), AvailabilityError> {
        let outcomes = join_all(products.iter().map(|product| self.set_present(product))).await;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    /// Compute, for the full product list, which products some *other*
    /// holder has in their bag, excluding anything in `locked`.
    ///
    /// # Errors
    ///
    /// Returns the first store failure; callers keep their previous set.
    pub async fn wanted_by_others(
        &self,
        products: &HashSet<ProductId>,
        locked: &HashSet<ProductId>,
    ) -> Result<HashSet<ProductId>, AvailabilityError> {
        let reads = join_all(products.iter().map(|product| async move {
            let rows = self
                .store
                .query_prefix(
                    collections::CART_PRESENCE,
                    &CartPresence::product_prefix(product),
                )
                .await?;
            Ok::<_, AvailabilityError>((product, rows))
        }))
        .await;

        let mut wanted = HashSet::new();
        for read in reads {
            let (product, rows) = read?;
            if locked.contains(product) {
                continue;
            }

            let in_another_bag = rows.iter().any(|raw| match raw.decode::<CartPresence>() {
                Ok(presence) => presence.holder_id != self.session.holder,
                Err(error) => {
                    tracing::warn!(%product, %error, "undecodable presence row ignored");
                    false
                },
            });
            if in_another_bag {
                wanted.insert(product.clone());
            }
        }
        Ok(wanted)
    }

    /// Subscribe to the "wanted by others" set for a product list.
    ///
    /// Re-runs the full product list on every presence change (the store
    /// has no compound listen-and-diff primitive), and again whenever the
    /// caller signals (via [`PresenceWatchHandle::reevaluate`]) that the
    /// externally supplied locked set changed. `locked` is consulted on
    /// every recompute so the wanted and locked sets stay disjoint.
    pub fn subscribe_wanted_by_others<F>(
        &self,
        products: &[ProductId],
        locked: LockedSetFn,
        callback: F,
    ) -> PresenceWatchHandle
    where
        F: Fn(HashSet<ProductId>) + Send + Sync + 'static,
    {
        let scope = TaskScope::new();
        let nudge = Arc::new(Notify::new());
        let tracker = self.clone();
        let products: HashSet<ProductId> = products.iter().cloned().collect();

        let nudge_task = Arc::clone(&nudge);
        scope.spawn(async move {
            loop {
                let mut changes = match tracker.store.watch(collections::CART_PRESENCE, "").await {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::warn!(%error, "presence watch failed to open, retrying");
                        tokio::time::sleep(WATCH_RETRY_DELAY).await;
                        continue;
                    },
                };

                tracker.emit_wanted(&products, &locked, &callback).await;

                loop {
                    tokio::select! {
                        () = nudge_task.notified() => {
                            tracker.emit_wanted(&products, &locked, &callback).await;
                        },
                        item = changes.next() => match item {
                            Some(Ok(change)) => {
                                let relevant = product_segment(change.key())
                                    .is_some_and(|product| products.contains(product));
                                if relevant {
                                    tracker.emit_wanted(&products, &locked, &callback).await;
                                }
                            },
                            Some(Err(DocumentStoreError::Lagged { missed })) => {
                                tracing::warn!(missed, "presence watch lagged, recomputing");
                                tracker.emit_wanted(&products, &locked, &callback).await;
                            },
                            Some(Err(error)) => {
                                tracing::warn!(%error, "presence watch errored, reopening");
                                break;
                            },
                            None => break,
                        },
                    }
                }

                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        });

        PresenceWatchHandle::new(scope, nudge)
    }

    async fn emit_wanted<F>(
        &self,
        products: &HashSet<ProductId>,
        locked: &LockedSetFn,
        callback: &F,
    ) where
        F: Fn(HashSet<ProductId>) + Send + Sync,
    {
        let locked_now = locked();
        match self.wanted_by_others(products, &locked_now).await {
            Ok(wanted) => callback(wanted),
            Err(error) => {
                // Assume no change happened; subscribers keep their last set
                tracing::warn!(%error, "failed to recompute wanted set");
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use garderobe_memstore::MemoryStore;
    use garderobe_testing::ManualClock;

    fn tracker_for(store: &MemoryStore, clock: &ManualClock, holder: &str) -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            SessionContext::for_user(holder),
        )
    }

    fn test_setup() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(garderobe_testing::test_clock().now());
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn set_present_is_idempotent() {
        let (store, clock) = test_setup();
        let tracker = tracker_for(&store, &clock, "u1");
        let product = ProductId::new("g-1");

        tracker.set_present(&product).await.unwrap();
        tracker.set_present(&product).await.unwrap();

        let rows = store
            .query_prefix(collections::CART_PRESENCE, "g-1::")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn clear_present_is_idempotent() {
        let (store, clock) = test_setup();
        let tracker = tracker_for(&store, &clock, "u1");
        let product = ProductId::new("g-1");

        tracker.set_present(&product).await.unwrap();
        tracker.clear_present(&product).await.unwrap();
        tracker.clear_present(&product).await.unwrap();

        let rows = store
            .query_prefix(collections::CART_PRESENCE, "g-1::")
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn batch_clear_removes_all_own_rows() {
        let (store, clock) = test_setup();
        let tracker = tracker_for(&store, &clock, "u1");
        let other = tracker_for(&store, &clock, "u2");

        let products = vec![ProductId::new("g-1"), ProductId::new("g-2")];
        for product in &products {
            tracker.set_present(product).await.unwrap();
        }
        other.set_present(&products[0]).await.unwrap();

        tracker.clear_present_batch(&products).await;

        let rows = store
            .query_prefix(collections::CART_PRESENCE, "")
            .await
            .unwrap();
        // Only the other holder's row remains
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "g-1::u2");
    }

    #[tokio::test]
    async fn wanted_excludes_own_bag() {
        let (store, clock) = test_setup();
        let mine = tracker_for(&store, &clock, "u1");
        let theirs = tracker_for(&store, &clock, "u2");

        mine.set_present(&ProductId::new("g-1")).await.unwrap();
        theirs.set_present(&ProductId::new("g-2")).await.unwrap();

        let products: HashSet<ProductId> =
            [ProductId::new("g-1"), ProductId::new("g-2")].into_iter().collect();

        let wanted = mine
            .wanted_by_others(&products, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(wanted, [ProductId::new("g-2")].into_iter().collect());
    }

    #[tokio::test]
    async fn wanted_excludes_locked_products() {
        let (store, clock) = test_setup();
        let mine = tracker_for(&store, &clock, "u1");
        let theirs = tracker_for(&store, &clock, "u2");

        theirs.set_present(&ProductId::new("g-1")).await.unwrap();

        let products: HashSet<ProductId> = [ProductId::new("g-1")].into_iter().collect();
        let locked: HashSet<ProductId> = [ProductId::new("g-1")].into_iter().collect();

        // Hard lock wins: the product is never reported as both
        let wanted = mine.wanted_by_others(&products, &locked).await.unwrap();
        assert!(wanted.is_empty());

        let wanted = mine
            .wanted_by_others(&products, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(wanted.len(), 1);
    }
}
