//! Live availability propagation tests.
//!
//! Exercises the aggregator over the in-memory store: locks appearing in
//! other sessions' views, bag presence surfacing as a soft warning, and the
//! two derived sets staying disjoint.
//!
//! Run with: `cargo test --test availability_test`

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use garderobe_availability::{
    Availability, AvailabilityAggregator, AvailabilityConfig, PresenceTracker, ProductId,
    ReservationManager, SessionContext,
};
use garderobe_core::environment::SystemClock;
use garderobe_memstore::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    store: MemoryStore,
    config: AvailabilityConfig,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            config: AvailabilityConfig::default(),
        }
    }

    fn reservations(&self, holder: &str) -> ReservationManager {
        ReservationManager::new(
            Arc::new(self.store.clone()),
            Arc::new(SystemClock),
            self.config,
            SessionContext::for_user(holder),
        )
    }

    fn presence(&self, holder: &str) -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(self.store.clone()),
            Arc::new(SystemClock),
            SessionContext::for_user(holder),
        )
    }

    fn aggregator(&self, holder: &str) -> AvailabilityAggregator {
        AvailabilityAggregator::new(
            Arc::new(self.store.clone()),
            Arc::new(SystemClock),
            self.config,
            SessionContext::for_user(holder),
        )
    }
}

/// Watch an aggregator through a channel and wait for a snapshot matching
/// the predicate, panicking on timeout.
async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Availability>,
    what: &str,
    predicate: impl Fn(&Availability) -> bool,
) -> Availability {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(availability)) => {
                if predicate(&availability) {
                    return availability;
                }
            },
            Ok(None) => panic!("availability channel closed waiting for {what}"),
            Err(_) => panic!("timed out waiting for {what}"),
        }
    }
}

fn subscribe(
    aggregator: &mut AvailabilityAggregator,
    products: &[ProductId],
) -> mpsc::UnboundedReceiver<Availability> {
    let (tx, rx) = mpsc::unbounded_channel();
    aggregator.subscribe(products, move |availability| {
        let _ = tx.send(availability);
    });
    rx
}

/// While another holder has a live reservation, the product is locked in
/// this observer's view; after release (and the next change notification)
/// it is not.
#[tokio::test]
async fn lock_appears_and_disappears_in_other_sessions_view() {
    let fixture = Fixture::new();
    let product = ProductId::new("garment-1");
    let products = vec![product.clone()];

    let u1 = fixture.reservations("u1");
    let mut u2_view = fixture.aggregator("u2");
    let mut changes = subscribe(&mut u2_view, &products);

    // Initially free
    wait_for(&mut changes, "initial empty set", |a| {
        a.locked_by_others.is_empty()
    })
    .await;

    assert!(u1.reserve(std::slice::from_ref(&product)).await.all_granted());
    wait_for(&mut changes, "lock to appear", |a| {
        a.locked_by_others.contains("garment-1")
    })
    .await;

    u1.release(std::slice::from_ref(&product)).await.unwrap();
    wait_for(&mut changes, "lock to clear", |a| {
        !a.locked_by_others.contains("garment-1")
    })
    .await;
}

/// A product in another holder's bag (with no reservation) shows up as
/// wanted, not locked.
#[tokio::test]
async fn bag_presence_is_a_soft_warning_only() {
    let fixture = Fixture::new();
    let product = ProductId::new("garment-2");
    let products = vec![product.clone()];

    let u3_bag = fixture.presence("u3");
    let mut u4_view = fixture.aggregator("u4");
    let mut changes = subscribe(&mut u4_view, &products);

    u3_bag.set_present(&product).await.unwrap();

    let availability = wait_for(&mut changes, "wanted to appear", |a| {
        a.wanted_by_others.contains("garment-2")
    })
    .await;
    assert!(!availability.locked_by_others.contains("garment-2"));

    // The observer's own bag never counts as wanted
    let u4_bag = fixture.presence("u4");
    u4_bag.set_present(&ProductId::new("garment-own")).await.unwrap();
    let snapshot = u4_view.snapshot();
    assert!(!snapshot.wanted_by_others.contains("garment-own"));
}

/// A product never appears in both derived sets for the same observer,
/// even while both signals are present.
#[tokio::test]
async fn locked_and_wanted_stay_disjoint() {
    let fixture = Fixture::new();
    let product = ProductId::new("garment-3");
    let products = vec![product.clone()];

    // u1 bags it AND reserves it; u2 observes
    let u1_bag = fixture.presence("u1");
    let u1_lock = fixture.reservations("u1");
    u1_bag.set_present(&product).await.unwrap();

    let mut u2_view = fixture.aggregator("u2");
    let mut changes = subscribe(&mut u2_view, &products);

    wait_for(&mut changes, "wanted to appear", |a| {
        a.wanted_by_others.contains("garment-3")
    })
    .await;

    assert!(u1_lock.reserve(std::slice::from_ref(&product)).await.all_granted());
    wait_for(&mut changes, "hard lock to win", |a| {
        a.locked_by_others.contains("garment-3") && !a.wanted_by_others.contains("garment-3")
    })
    .await;

    // Every emission along the way kept the sets disjoint
    while let Ok(availability) = changes.try_recv() {
        assert!(
            availability
                .locked_by_others
                .is_disjoint(&availability.wanted_by_others)
        );
    }

    // After release, the presence row still exists, so the item degrades
    // from locked back to wanted
    u1_lock.release(std::slice::from_ref(&product)).await.unwrap();
    wait_for(&mut changes, "degrade to wanted", |a| {
        !a.locked_by_others.contains("garment-3") && a.wanted_by_others.contains("garment-3")
    })
    .await;
}

/// Swapping the product list tears the old subscriptions down: changes to
/// the old product no longer reach the callback.
#[tokio::test]
async fn set_products_resubscribes_cleanly() {
    let fixture = Fixture::new();
    let old_product = ProductId::new("garment-old");
    let new_product = ProductId::new("garment-new");

    let u1 = fixture.reservations("u1");
    let mut view = fixture.aggregator("u2");
    let mut changes = subscribe(&mut view, std::slice::from_ref(&old_product));

    wait_for(&mut changes, "initial emission", |_| true).await;

    view.set_products(std::slice::from_ref(&new_product));

    // A lock on the old product must not surface anymore
    assert!(u1.reserve(std::slice::from_ref(&old_product)).await.all_granted());
    // A lock on the new product must
    assert!(u1.reserve(std::slice::from_ref(&new_product)).await.all_granted());

    let availability = wait_for(&mut changes, "new product lock", |a| {
        a.locked_by_others.contains("garment-new")
    })
    .await;
    assert!(!availability.locked_by_others.contains("garment-old"));

    view.unsubscribe();
    assert_eq!(view.snapshot(), Availability::default());
}

/// `unsubscribe` stops all callbacks with a single call.
#[tokio::test]
async fn unsubscribe_stops_callbacks() {
    let fixture = Fixture::new();
    let product = ProductId::new("garment-4");

    let u1 = fixture.reservations("u1");
    let mut view = fixture.aggregator("u2");
    let mut changes = subscribe(&mut view, std::slice::from_ref(&product));

    wait_for(&mut changes, "initial emission", |_| true).await;
    view.unsubscribe();

    assert!(u1.reserve(std::slice::from_ref(&product)).await.all_granted());
    tokio::time::sleep(Duration::from_millis(300)).await;

    while let Ok(availability) = changes.try_recv() {
        assert!(
            !availability.locked_by_others.contains("garment-4"),
            "callback fired after unsubscribe"
        );
    }
}

/// The viewer counter is excluded from availability: a crowd of viewers
/// never locks or warns.
#[tokio::test]
async fn viewers_do_not_affect_availability() {
    let fixture = Fixture::new();
    let product = ProductId::new("garment-5");

    for viewer in ["v1", "v2", "v3"] {
        let counter = garderobe_availability::ViewerCounter::new(
            Arc::new(fixture.store.clone()),
            Arc::new(SystemClock),
            SessionContext::for_user(viewer),
        );
        counter.add_viewer(&product).await.unwrap();
    }

    let mut view = fixture.aggregator("u1");
    let mut changes = subscribe(&mut view, std::slice::from_ref(&product));

    let availability = wait_for(&mut changes, "initial emission", |_| true).await;
    assert!(availability.locked_by_others.is_empty());
    assert!(availability.wanted_by_others.is_empty());
}
