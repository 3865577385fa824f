//! Availability coordination demo.
//!
//! Two buyers contend over the same one-of-a-kind garment:
//! - both put it in their bags and watch its availability
//! - the first one to enter checkout wins the reservation
//! - the loser sees a hard lock (and a rejection if they race for it)
//! - when the winner abandons, the item unlocks and returns to their bag
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin demo
//! ```

use garderobe_availability::checkout::CheckoutEnvironment;
use garderobe_availability::{
    AvailabilityAggregator, AvailabilityConfig, CheckoutSession, PresenceTracker, ProductId,
    SessionContext, ViewerCounter,
};
use garderobe_core::environment::SystemClock;
use garderobe_memstore::MemoryStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,garderobe_availability=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n============================================");
    println!("  Garderobe - availability coordination demo");
    println!("============================================\n");

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);
    let config = AvailabilityConfig::from_env();

    let garment = ProductId::new("garment-denim-jacket");
    let products = vec![garment.clone()];

    // Two connected sessions, each with its own identity
    let alice = SessionContext::for_user("alice");
    let bruno = SessionContext::for_user(format!("anon-{}", uuid::Uuid::new_v4()));

    // Bruno browses the product page; the viewer counter ticks up
    let viewers = ViewerCounter::new(store.clone(), clock.clone(), bruno.clone());
    viewers.add_viewer(&garment).await?;
    println!(
        "👀 {} viewer(s) on the product page",
        viewers.viewer_count(&garment).await?
    );

    // Bruno watches availability for his bag view
    let mut bruno_view =
        AvailabilityAggregator::new(store.clone(), clock.clone(), config, bruno.clone());
    bruno_view.subscribe(&products, |availability| {
        println!(
            "🔔 bruno's view: locked={:?} wanted={:?}",
            availability.locked_by_others, availability.wanted_by_others
        );
    });

    // Both add the garment to their bags
    let alice_bag = PresenceTracker::new(store.clone(), clock.clone(), alice.clone());
    let bruno_bag = PresenceTracker::new(store.clone(), clock.clone(), bruno.clone());
    alice_bag.set_present(&garment).await?;
    bruno_bag.set_present(&garment).await?;
    println!("🛍  alice and bruno both bagged the jacket");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Alice enters checkout first and wins the lock
    let alice_session = CheckoutSession::new(CheckoutEnvironment::new(
        store.clone(),
        clock.clone(),
        config,
        alice,
    ));
    let entry = alice_session.enter(&products, &HashSet::new()).await?;
    println!("✅ alice entered checkout, holding {:?}", entry.granted);
    if let Some(remaining) = alice_session.remaining().await {
        println!("⏳ alice's countdown: {}s", remaining.num_seconds());
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Bruno tries anyway and loses the race cleanly
    let bruno_session = CheckoutSession::new(CheckoutEnvironment::new(
        store.clone(),
        clock.clone(),
        config,
        bruno,
    ));
    let entry = bruno_session.enter(&products, &HashSet::new()).await?;
    for (product, reason) in &entry.rejected {
        println!("❌ bruno could not reserve {product}: {reason}");
    }
    bruno_session.leave().await?;

    // Alice changes her mind; the jacket returns to her bag and unlocks
    alice_session.abandon().await?;
    println!("↩️  alice abandoned checkout");
    tokio::time::sleep(Duration::from_millis(200)).await;

    viewers.remove_viewer(&garment).await?;
    bruno_view.unsubscribe();
    alice_session.shutdown(Duration::from_secs(5)).await?;
    bruno_session.shutdown(Duration::from_secs(5)).await?;

    println!("\nDone.");
    Ok(())
}
