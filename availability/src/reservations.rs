//! Exclusive reservation lock per product, with TTL expiry and heartbeat
//! renewal.
//!
//! A [`Reservation`] is the only signal that blocks a purchase. It is
//! acquired on checkout entry, kept alive by periodic [`extend`] heartbeats,
//! and deleted on release. Liveness is judged client-side: readers compare
//! `expires_at` against their own clock at the moment a change notification
//! arrives; an expired-but-undeleted document is treated as absent.
//!
//! # Exclusivity
//!
//! Acquisition uses conditional writes (create-if-absent, or compare-and-swap
//! over an expired or self-held document), so two near-simultaneous buyers
//! cannot both win: the loser gets a per-product rejection it can surface as
//! "someone else just reserved this". Renewal and release verify ownership by
//! read, then write with a compare-and-swap on the revision they read: a
//! stale extend can never clobber a reservation another holder acquired in
//! between.
//!
//! [`extend`]: ReservationManager::extend

use crate::config::AvailabilityConfig;
use crate::error::AvailabilityError;
use crate::types::{HolderId, ProductId, Reservation, SessionContext, collections};
use crate::watch::{WATCH_RETRY_DELAY, WatchHandle};
use futures::StreamExt;
use futures::future::join_all;
use garderobe_core::document::Document;
use garderobe_core::environment::Clock;
use garderobe_core::store::{DocumentStore, DocumentStoreError, Precondition};
use garderobe_runtime::TaskScope;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Why one product could not be reserved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveRejection {
    /// Another holder currently has a live reservation.
    HeldByOther {
        /// Who holds it.
        holder: HolderId,
    },
    /// Another writer won the conditional write race for this product.
    Raced,
    /// The store was unreachable; nothing changed for this product.
    Unavailable {
        /// Underlying failure, for logs.
        reason: String,
    },
}

impl fmt::Display for ReserveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeldByOther { holder } => write!(f, "held by {holder}"),
            Self::Raced => write!(f, "someone else just reserved this"),
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
        }
    }
}

/// Per-product outcome of a [`ReservationManager::reserve`] call.
///
/// Each product's acquisition is independent: a rejection on one never
/// aborts the others.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReserveReport {
    /// Products now exclusively held by the caller.
    pub granted: Vec<ProductId>,
    /// Products that could not be acquired, with the reason.
    pub rejected: Vec<(ProductId, ReserveRejection)>,
}

impl ReserveReport {
    /// Whether every requested product was granted.
    #[must_use]
    pub fn all_granted(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Whether the call was a no-op (nothing granted, nothing rejected).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.rejected.is_empty()
    }
}

/// Owns the exclusive "about to be paid for" lock per product.
///
/// One manager per connected session; the session's identity is fixed at
/// construction.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: AvailabilityConfig,
    session: SessionContext,
}

impl ReservationManager {
    /// Create a manager bound to one session's identity.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
        session: SessionContext,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            session,
        }
    }

    /// The session identity this manager acts for.
    #[must_use]
    pub const fn session(&self) -> &SessionContext {
        &self.session
    }

    /// The fixed renewal period, exposed so callers can schedule
    /// [`ReservationManager::extend`] at a safe fraction of the TTL.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> std::time::Duration {
        self.config.heartbeat_interval()
    }

    /// Try to acquire the reservation lock on each product.
    ///
    /// No-op (empty report) when the product list or the session holder is
    /// empty. Per product: a live reservation by another holder (or losing
    /// the conditional-write race) lands the product in
    /// [`ReserveReport::rejected`]; otherwise the product is granted with a
    /// fresh TTL. An expired or self-held document is simply replaced.
    pub async fn reserve(&self, products: &[ProductId]) -> ReserveReport {
        if products.is_empty() || self.session.holder.is_empty() {
            tracing::debug!("reserve called with nothing to do");
            return ReserveReport::default();
        }

        let attempts = join_all(
            products
                .iter()
                .map(|product| async move { (product.clone(), self.reserve_one(product).await) }),
        )
        .await;

        let mut report = ReserveReport::default();
        for (product, outcome) in attempts {
            match outcome {
                Ok(()) => report.granted.push(product),
                Err(rejection) => {
                    tracing::info!(%product, %rejection, "reservation rejected");
                    report.rejected.push((product, rejection));
                },
            }
        }
        report
    }

    async fn reserve_one(&self, product: &ProductId) -> Result<(), ReserveRejection> {
        let unavailable = |error: &dyn fmt::Display| ReserveRejection::Unavailable {
            reason: error.to_string(),
        };

        let key = Reservation::storage_key(product);
        let current = self
            .store
            .get(collections::RESERVATIONS, key)
            .await
            .map_err(|e| unavailable(&e))?;

        let now = self.clock.now();
        let precondition = match &current {
            None => Precondition::Absent,
            Some(raw) => {
                match raw.decode::<Reservation>() {
                    Ok(existing)
                        if existing.is_live(now) && existing.holder_id != self.session.holder =>
                    {
                        return Err(ReserveRejection::HeldByOther {
                            holder: existing.holder_id,
                        });
                    },
                    Ok(_) => {},
                    // An unreadable document cannot be live; replace it
                    Err(error) => {
                        tracing::warn!(%product, %error, "replacing undecodable reservation");
                    },
                }
                Precondition::Revision(raw.revision)
            },
        };

        let reservation = Reservation {
            product_id: product.clone(),
            holder_id: self.session.holder.clone(),
            expires_at: now + self.config.reservation_ttl_chrono(),
            updated_at: now,
        };
        let payload = reservation.encode().map_err(|e| unavailable(&e))?;

        match self
            .store
            .put_if(collections::RESERVATIONS, key, payload, precondition)
            .await
        {
            Ok(_) => {
                tracing::debug!(%product, holder = %self.session.holder, "reservation acquired");
                Ok(())
            },
            Err(DocumentStoreError::PreconditionFailed { .. }) => Err(ReserveRejection::Raced),
            Err(error) => Err(unavailable(&error)),
        }
    }

    /// Renew the TTL on each product's reservation.
    ///
    /// A reservation that is missing, held by someone else, or concurrently
    /// replaced is silently skipped: the caller's intended extension is
    /// dropped and the next heartbeat (or the expiry flow) picks up the
    /// consequences. Transient store failures are likewise left to the next
    /// heartbeat tick.
    pub async fn extend(&self, products: &[ProductId]) {
        if products.is_empty() || self.session.holder.is_empty() {
            return;
        }

        join_all(products.iter().map(|product| self.extend_one(product))).await;
    }

    async fn extend_one(&self, product: &ProductId) {
        let key = Reservation::storage_key(product);
        let current = match self.store.get(collections::RESERVATIONS, key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(%product, "no reservation to extend");
                return;
            },
            Err(error) => {
                tracing::warn!(%product, %error, "extend read failed, retrying on next heartbeat");
                return;
            },
        };

        let existing = match current.decode::<Reservation>() {
            Ok(doc) => doc,
            Err(error) => {
                tracing::warn!(%product, %error, "undecodable reservation, extension dropped");
                return;
            },
        };

        if existing.holder_id != self.session.holder {
            tracing::debug!(
                %product,
                holder = %existing.holder_id,
                "reservation held by another, extension dropped"
            );
            return;
        }

        let now = self.clock.now();
        let renewed = Reservation {
            expires_at: now + self.config.reservation_ttl_chrono(),
            updated_at: now,
            ..existing
        };
        let Ok(payload) = renewed.encode() else {
            tracing::warn!(%product, "failed to encode renewed reservation");
            return;
        };

        match self
            .store
            .put_if(
                collections::RESERVATIONS,
                key,
                payload,
                Precondition::Revision(current.revision),
            )
            .await
        {
            Ok(_) => tracing::trace!(%product, "reservation extended"),
            Err(DocumentStoreError::PreconditionFailed { .. }) => {
                tracing::debug!(%product, "reservation changed underneath, extension dropped");
            },
            Err(error) => {
                tracing::warn!(%product, %error, "extend write failed, retrying on next heartbeat");
            },
        }
    }

    /// Delete each product's reservation, if this session still owns it.
    ///
    /// Idempotent: releasing an absent reservation, or one now owned by
    /// someone else, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first transient store failure after attempting every
    /// product; ownership conflicts never error.
    pub async fn release(&self, products: &[ProductId]) -> Result<(), AvailabilityError> {
        if products.is_empty() || self.session.holder.is_empty() {
            return Ok(());
        }

        let outcomes = join_all(products.iter().map(|product| self.release_one(product))).await;
        for outcome in outcomes {
            outcome?;
        }
        Ok(())
    }

    async fn release_one(&self, product: &ProductId) -> Result<(), AvailabilityError> {
        let key = Reservation::storage_key(product);
        let Some(current) = self.store.get(collections::RESERVATIONS, key).await? else {
            return Ok(());
        };

        match current.decode::<Reservation>() {
            Ok(existing) if existing.holder_id == self.session.holder => {},
            Ok(existing) => {
                tracing::debug!(
                    %product,
                    holder = %existing.holder_id,
                    "reservation held by another, release skipped"
                );
                return Ok(());
            },
            Err(error) => {
                tracing::warn!(%product, %error, "undecodable reservation, release skipped");
                return Ok(());
            },
        }

        match self
            .store
            .delete_if(collections::RESERVATIONS, key, current.revision)
            .await
        {
            Ok(()) => {
                tracing::debug!(%product, "reservation released");
                Ok(())
            },
            Err(DocumentStoreError::PreconditionFailed { .. }) => {
                // Someone re-acquired between our read and delete; their
                // reservation stands
                tracing::debug!(%product, "reservation changed underneath, release skipped");
                Ok(())
            },
            Err(error) => Err(error.into()),
        }
    }

    /// Compute the set of products locked by holders other than this
    /// session, judged on this session's clock right now.
    ///
    /// # Errors
    ///
    /// Returns the first store failure; callers keep their previous set in
    /// that case.
    pub async fn locked_by_others(
        &self,
        products: &HashSet<ProductId>,
    ) -> Result<HashSet<ProductId>, AvailabilityError> {
        let now = self.clock.now();
        let reads = join_all(products.iter().map(|product| async move {
            let raw = self
                .store
                .get(collections::RESERVATIONS, Reservation::storage_key(product))
                .await?;
            Ok::<_, AvailabilityError>((product, raw))
        }))
        .await;

        let mut locked = HashSet::new();
        for read in reads {
            let (product, raw) = read?;
            let Some(raw) = raw else { continue };
            match raw.decode::<Reservation>() {
                Ok(reservation)
                    if reservation.is_live(now)
                        && reservation.holder_id != self.session.holder =>
                {
                    locked.insert(product.clone());
                },
                Ok(_) => {},
                Err(error) => {
                    tracing::warn!(%product, %error, "undecodable reservation ignored");
                },
            }
        }
        Ok(locked)
    }

    /// Subscribe to the "locked by others" set for a product list.
    ///
    /// Invokes `callback` with a freshly computed set once on subscription
    /// and again after every relevant reservation change. Liveness is judged
    /// against this session's clock at the moment each notification arrives.
    /// The returned handle tears the subscription down on cancel or drop.
    pub fn subscribe_reserved_by_others<F>(
        &self,
        products: &[ProductId],
        callback: F,
    ) -> WatchHandle
    where
        F: Fn(HashSet<ProductId>) + Send + Sync + 'static,
    {
        let scope = TaskScope::new();
        let manager = self.clone();
        let products: HashSet<ProductId> = products.iter().cloned().collect();

        scope.spawn(async move {
            loop {
                let mut changes = match manager.store.watch(collections::RESERVATIONS, "").await {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::warn!(%error, "reservation watch failed to open, retrying");
                        tokio::time::sleep(WATCH_RETRY_DELAY).await;
                        continue;
                    },
                };

                // Recompute after (re)subscribing so nothing written between
                // query and watch is missed
                manager.emit_locked(&products, &callback).await;

                while let Some(item) = changes.next().await {
                    match item {
                        Ok(change) => {
                            if products.contains(change.key()) {
                                manager.emit_locked(&products, &callback).await;
                            }
                        },
                        Err(DocumentStoreError::Lagged { missed }) => {
                            tracing::warn!(missed, "reservation watch lagged, recomputing");
                            manager.emit_locked(&products, &callback).await;
                        },
                        Err(error) => {
                            tracing::warn!(%error, "reservation watch errored, reopening");
                            break;
                        },
                    }
                }

                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        });

        WatchHandle::new(scope)
    }

    async fn emit_locked<F>(&self, products: &HashSet<ProductId>, callback: &F)
    where
        F: Fn(HashSet<ProductId>) + Send + Sync,
    {
        match self.locked_by_others(products).await {
            Ok(locked) => callback(locked),
            Err(error) => {
                // Assume no change happened; subscribers keep their last set
                tracing::warn!(%error, "failed to recompute locked set");
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use garderobe_memstore::MemoryStore;
    use garderobe_testing::ManualClock;

    fn manager_for(
        store: &MemoryStore,
        clock: &ManualClock,
        holder: &str,
    ) -> ReservationManager {
        ReservationManager::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            AvailabilityConfig::default(),
            SessionContext::for_user(holder),
        )
    }

    fn test_setup() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(garderobe_testing::test_clock().now());
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    async fn stored_reservation(store: &MemoryStore, product: &str) -> Option<Reservation> {
        store
            .get(collections::RESERVATIONS, product)
            .await
            .unwrap()
            .map(|raw| raw.decode().unwrap())
    }

    #[tokio::test]
    async fn reserve_grants_free_product_with_full_ttl() {
        let (store, clock) = test_setup();
        let manager = manager_for(&store, &clock, "u1");

        let report = manager.reserve(&[ProductId::new("g-1")]).await;
        assert!(report.all_granted());
        assert_eq!(report.granted, vec![ProductId::new("g-1")]);

        let reservation = stored_reservation(&store, "g-1").await.unwrap();
        assert_eq!(reservation.holder_id, HolderId::new("u1"));
        assert_eq!(
            reservation.expires_at - clock.now(),
            Duration::minutes(10)
        );
    }

    #[tokio::test]
    async fn reserve_empty_list_is_noop() {
        let (store, clock) = test_setup();
        let manager = manager_for(&store, &clock, "u1");

        let report = manager.reserve(&[]).await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn reserve_empty_holder_is_noop() {
        let (store, clock) = test_setup();
        let manager = ReservationManager::new(
            Arc::new(store.clone()),
            Arc::new(clock),
            AvailabilityConfig::default(),
            SessionContext::new(HolderId::new(""), crate::types::ViewerId::new("v")),
        );

        let report = manager.reserve(&[ProductId::new("g-1")]).await;
        assert!(report.is_empty());
        assert!(stored_reservation(&store, "g-1").await.is_none());
    }

    #[tokio::test]
    async fn reserve_rejects_product_held_by_other() {
        let (store, clock) = test_setup();
        let first = manager_for(&store, &clock, "u1");
        let second = manager_for(&store, &clock, "u2");

        assert!(first.reserve(&[ProductId::new("g-1")]).await.all_granted());

        let report = second.reserve(&[ProductId::new("g-1")]).await;
        assert!(report.granted.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0].1,
            ReserveRejection::HeldByOther { ref holder } if holder.as_str() == "u1"
        ));

        // The first holder's reservation survived untouched
        let reservation = stored_reservation(&store, "g-1").await.unwrap();
        assert_eq!(reservation.holder_id, HolderId::new("u1"));
    }

    #[tokio::test]
    async fn reserve_replaces_expired_reservation() {
        let (store, clock) = test_setup();
        let first = manager_for(&store, &clock, "u1");
        let second = manager_for(&store, &clock, "u2");

        assert!(first.reserve(&[ProductId::new("g-1")]).await.all_granted());

        clock.advance(Duration::minutes(11));

        let report = second.reserve(&[ProductId::new("g-1")]).await;
        assert!(report.all_granted());

        let reservation = stored_reservation(&store, "g-1").await.unwrap();
        assert_eq!(reservation.holder_id, HolderId::new("u2"));
    }

    #[tokio::test]
    async fn reserve_partial_batch_grants_what_it_can() {
        let (store, clock) = test_setup();
        let first = manager_for(&store, &clock, "u1");
        let second = manager_for(&store, &clock, "u2");

        assert!(first.reserve(&[ProductId::new("g-1")]).await.all_granted());

        let report = second
            .reserve(&[ProductId::new("g-1"), ProductId::new("g-2")])
            .await;
        assert_eq!(report.granted, vec![ProductId::new("g-2")]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, ProductId::new("g-1"));
    }

    #[tokio::test]
    async fn extend_resets_ttl_for_own_reservation() {
        let (store, clock) = test_setup();
        let manager = manager_for(&store, &clock, "u1");

        manager.reserve(&[ProductId::new("g-1")]).await;
        clock.advance(Duration::minutes(9));

        manager.extend(&[ProductId::new("g-1")]).await;

        let reservation = stored_reservation(&store, "g-1").await.unwrap();
        assert_eq!(
            reservation.expires_at - clock.now(),
            Duration::minutes(10)
        );
    }

    #[tokio::test]
    async fn extend_skips_foreign_reservation() {
        let (store, clock) = test_setup();
        let owner = manager_for(&store, &clock, "u1");
        let other = manager_for(&store, &clock, "u2");

        owner.reserve(&[ProductId::new("g-1")]).await;
        let before = stored_reservation(&store, "g-1").await.unwrap();

        clock.advance(Duration::minutes(1));
        other.extend(&[ProductId::new("g-1")]).await;

        let after = stored_reservation(&store, "g-1").await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn extend_missing_reservation_is_silent() {
        let (store, clock) = test_setup();
        let manager = manager_for(&store, &clock, "u1");

        manager.extend(&[ProductId::new("g-1")]).await;
        assert!(stored_reservation(&store, "g-1").await.is_none());
    }

    #[tokio::test]
    async fn release_deletes_own_reservation_and_is_idempotent() {
        let (store, clock) = test_setup();
        let manager = manager_for(&store, &clock, "u1");

        manager.reserve(&[ProductId::new("g-1")]).await;

        manager.release(&[ProductId::new("g-1")]).await.unwrap();
        assert!(stored_reservation(&store, "g-1").await.is_none());

        // Second release: same observable effect, no error
        manager.release(&[ProductId::new("g-1")]).await.unwrap();
        assert!(stored_reservation(&store, "g-1").await.is_none());
    }

    #[tokio::test]
    async fn release_skips_foreign_reservation() {
        let (store, clock) = test_setup();
        let owner = manager_for(&store, &clock, "u1");
        let other = manager_for(&store, &clock, "u2");

        owner.reserve(&[ProductId::new("g-1")]).await;
        other.release(&[ProductId::new("g-1")]).await.unwrap();

        let reservation = stored_reservation(&store, "g-1").await.unwrap();
        assert_eq!(reservation.holder_id, HolderId::new("u1"));
    }

    #[tokio::test]
    async fn locked_by_others_excludes_own_and_expired() {
        let (store, clock) = test_setup();
        let mine = manager_for(&store, &clock, "u1");
        let theirs = manager_for(&store, &clock, "u2");

        mine.reserve(&[ProductId::new("g-mine")]).await;
        theirs.reserve(&[ProductId::new("g-theirs")]).await;

        let products: HashSet<ProductId> = [
            ProductId::new("g-mine"),
            ProductId::new("g-theirs"),
            ProductId::new("g-free"),
        ]
        .into_iter()
        .collect();

        let locked = mine.locked_by_others(&products).await.unwrap();
        assert_eq!(
            locked,
            [ProductId::new("g-theirs")].into_iter().collect()
        );

        // After the TTL passes, the undeleted document reads as absent
        clock.advance(Duration::minutes(11));
        let locked = mine.locked_by_others(&products).await.unwrap();
        assert!(locked.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_interval_comes_from_config() {
        let (store, clock) = test_setup();
        let manager = manager_for(&store, &clock, "u1");
        assert_eq!(
            manager.heartbeat_interval(),
            std::time::Duration::from_secs(120)
        );
    }
}
