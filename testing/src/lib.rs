//! # Garderobe Testing
//!
//! Testing utilities and helpers for the Garderobe coordination system.
//!
//! This crate provides:
//! - Mock clocks (fixed and manually advanced) so reservation-expiry logic
//!   can be tested without waiting on wall-clock time
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - Assertion helpers for effect lists
//!
//! ## Example
//!
//! ```ignore
//! use garderobe_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(CheckoutReducer::new())
//!     .with_env(test_environment())
//!     .given_state(CheckoutState::new())
//!     .when_action(CheckoutAction::AbandonCheckout)
//!     .then_state(|state| assert!(state.items.is_empty()))
//!     .run();
//! ```

pub mod mocks;
mod reducer_test;

pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
