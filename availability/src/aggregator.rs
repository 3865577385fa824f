//! Client-side composition of the lock and presence streams.
//!
//! The aggregator subscribes to the Reservation Manager's "locked by others"
//! stream and the Presence Tracker's "wanted by others" stream for one
//! product list and folds them into a single [`Availability`] snapshot the
//! UI (and the checkout flow) consumes: `locked_by_others` is the hard
//! block, `wanted_by_others` the soft warning, and the two are always
//! disjoint: the hard lock wins.

use crate::config::AvailabilityConfig;
use crate::presence::PresenceTracker;
use crate::reservations::ReservationManager;
use crate::types::{ProductId, SessionContext};
use crate::watch::{PresenceWatchHandle, WatchHandle};
use garderobe_core::environment::Clock;
use garderobe_core::store::DocumentStore;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Always-current derived availability for one observer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Availability {
    /// Products with a live reservation held by someone else. Hard block:
    /// the observer cannot buy these right now.
    pub locked_by_others: HashSet<ProductId>,
    /// Products in some other holder's bag but not locked. Soft warning
    /// only; never blocks purchase.
    pub wanted_by_others: HashSet<ProductId>,
}

/// Callback invoked with every recomputed [`Availability`].
pub type AvailabilityCallback = Arc<dyn Fn(Availability) + Send + Sync>;

#[derive(Default)]
struct SharedSets {
    locked: RwLock<HashSet<ProductId>>,
    wanted: RwLock<HashSet<ProductId>>,
}

impl SharedSets {
    fn locked(&self) -> HashSet<ProductId> {
        self.locked
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn snapshot(&self) -> Availability {
        let locked = self.locked();
        let mut wanted = self
            .wanted
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        // Hard lock wins; the sets never overlap in what observers see
        for product in &locked {
            wanted.remove(product);
        }
        Availability {
            locked_by_others: locked,
            wanted_by_others: wanted,
        }
    }

    fn store_locked(&self, set: HashSet<ProductId>) {
        *self
            .locked
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = set;
    }

    fn store_wanted(&self, set: HashSet<ProductId>) {
        *self
            .wanted
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = set;
    }

    fn clear(&self) {
        self.store_locked(HashSet::new());
        self.store_wanted(HashSet::new());
    }
}

struct ActiveSubscription {
    reservations: WatchHandle,
    presence: PresenceWatchHandle,
}

/// Composes reservation and presence streams into derived availability
/// sets for one session.
///
/// Changing the product list (or the session identity) tears the old
/// subscriptions down before opening new ones, so callbacks are never
/// duplicated and nothing leaks. [`AvailabilityAggregator::unsubscribe`]
/// tears both underlying streams down in one call.
pub struct AvailabilityAggregator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: AvailabilityConfig,
    reservations: ReservationManager,
    presence: PresenceTracker,
    sets: Arc<SharedSets>,
    products: Vec<ProductId>,
    callback: Option<AvailabilityCallback>,
    subscription: Option<ActiveSubscription>,
}

impl AvailabilityAggregator {
    /// Create an aggregator for one session.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
        session: SessionContext,
    ) -> Self {
        let reservations = ReservationManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config,
            session.clone(),
        );
        let presence =
            PresenceTracker::new(Arc::clone(&store), Arc::clone(&clock), session);

        Self {
            store,
            clock,
            config,
            reservations,
            presence,
            sets: Arc::new(SharedSets::default()),
            products: Vec::new(),
            callback: None,
            subscription: None,
        }
    }

    /// Start watching availability for `products`, invoking `callback` with
    /// every recomputed snapshot.
    ///
    /// Replaces any previous subscription.
    pub fn subscribe<F>(&mut self, products: &[ProductId], callback: F)
    where
        F: Fn(Availability) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self.products = products.to_vec();
        self.resubscribe();
    }

    /// Swap the watched product list, reusing the existing callback.
    ///
    /// Old subscriptions are torn down before the new ones are created.
    pub fn set_products(&mut self, products: &[ProductId]) {
        self.products = products.to_vec();
        self.resubscribe();
    }

    /// Swap the session identity (e.g., anonymous token upgraded to a
    /// signed-in user), rebuilding the underlying managers and
    /// resubscribing.
    pub fn set_session(&mut self, session: SessionContext) {
        self.reservations = ReservationManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config,
            session.clone(),
        );
        self.presence =
            PresenceTracker::new(Arc::clone(&self.store), Arc::clone(&self.clock), session);
        self.resubscribe();
    }

    /// Current derived sets (always disjoint).
    #[must_use]
    pub fn snapshot(&self) -> Availability {
        self.sets.snapshot()
    }

    /// Tear down both underlying streams.
    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.reservations.cancel();
            subscription.presence.cancel();
        }
        self.sets.clear();
    }

    fn resubscribe(&mut self) {
        self.unsubscribe();
        let Some(callback) = self.callback.clone() else {
            return;
        };
        if self.products.is_empty() {
            // Nothing to watch; report the (empty) snapshot once
            callback(self.sets.snapshot());
            return;
        }

        // Presence first: its locked-set closure reads the shared sets that
        // the reservation stream keeps current.
        let sets_for_locked = Arc::clone(&self.sets);
        let sets_for_wanted = Arc::clone(&self.sets);
        let wanted_callback = callback.clone();
        let presence_watch = self.presence.subscribe_wanted_by_others(
            &self.products,
            Arc::new(move || sets_for_locked.locked()),
            move |wanted| {
                sets_for_wanted.store_wanted(wanted);
                wanted_callback(sets_for_wanted.snapshot());
            },
        );

        // Reservation stream: updates the locked set, nudges the presence
        // watch to re-deduplicate, and emits.
        let nudge = presence_watch.nudger();
        let sets_for_reserved = Arc::clone(&self.sets);
        let locked_callback = callback;
        let reservation_watch = self.reservations.subscribe_reserved_by_others(
            &self.products,
            move |locked| {
                sets_for_reserved.store_locked(locked);
                nudge.notify_one();
                locked_callback(sets_for_reserved.snapshot());
            },
        );

        self.subscription = Some(ActiveSubscription {
            reservations: reservation_watch,
            presence: presence_watch,
        });
    }
}

impl Drop for AvailabilityAggregator {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_sets_disjoint() {
        let sets = SharedSets::default();
        sets.store_locked([ProductId::new("g-1")].into_iter().collect());
        sets.store_wanted(
            [ProductId::new("g-1"), ProductId::new("g-2")]
                .into_iter()
                .collect(),
        );

        let snapshot = sets.snapshot();
        assert!(snapshot.locked_by_others.contains("g-1"));
        assert!(!snapshot.wanted_by_others.contains("g-1"));
        assert!(snapshot.wanted_by_others.contains("g-2"));
        assert!(
            snapshot
                .locked_by_others
                .is_disjoint(&snapshot.wanted_by_others)
        );
    }
}
