//! # Garderobe Availability
//!
//! Product availability coordination for a marketplace of unique second-hand
//! garments.
//!
//! Every listed item exists exactly once. The moment one buyer is actively
//! paying for it, no other buyer may also purchase it, while any number of
//! buyers may keep browsing it or holding it in their bags. There is no
//! central transactional database; coordination happens entirely through a
//! document store with push notifications.
//!
//! ## Components
//!
//! - [`reservations::ReservationManager`]: the exclusive "about to be paid
//!   for" lock per product, with TTL expiry, heartbeat renewal, and
//!   conditional-write acquisition so two near-simultaneous buyers cannot
//!   both win
//! - [`presence::PresenceTracker`]: the weak "in somebody's bag" signal;
//!   informational, never blocks a purchase
//! - [`viewers::ViewerCounter`]: the advisory "N people looking at this
//!   now" counter
//! - [`aggregator::AvailabilityAggregator`]: folds the lock and presence
//!   streams into the two disjoint sets the UI consumes: `locked_by_others`
//!   (hard block) and `wanted_by_others` (soft warning)
//! - [`checkout`] / [`session::CheckoutSession`]: the checkout state
//!   machine: countdown, heartbeats, expiry warning with grace window,
//!   release-on-leave, and the payment hand-off that suppresses it
//!
//! ## Example
//!
//! ```no_run
//! use garderobe_availability::checkout::CheckoutEnvironment;
//! use garderobe_availability::config::AvailabilityConfig;
//! use garderobe_availability::session::CheckoutSession;
//! use garderobe_availability::types::{ProductId, SessionContext};
//! use garderobe_core::environment::SystemClock;
//! use garderobe_memstore::MemoryStore;
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let env = CheckoutEnvironment::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     AvailabilityConfig::from_env(),
//!     SessionContext::for_user("user-1"),
//! );
//! let session = CheckoutSession::new(env);
//!
//! let entry = session
//!     .enter(&[ProductId::new("garment-1")], &HashSet::new())
//!     .await?;
//! println!("holding {} item(s)", entry.granted.len());
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod checkout;
pub mod config;
pub mod error;
pub mod presence;
pub mod reservations;
pub mod session;
pub mod types;
pub mod viewers;
pub mod watch;

pub use aggregator::{Availability, AvailabilityAggregator};
pub use config::AvailabilityConfig;
pub use error::AvailabilityError;
pub use presence::PresenceTracker;
pub use reservations::{ReservationManager, ReserveRejection, ReserveReport};
pub use session::{CheckoutEntry, CheckoutSession};
pub use types::{HolderId, ProductId, SessionContext, ViewerId};
pub use viewers::ViewerCounter;
pub use watch::{PresenceWatchHandle, WatchHandle};
