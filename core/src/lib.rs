//! # Garderobe Core
//!
//! Core traits and types for the Garderobe availability coordination system.
//!
//! Garderobe is a marketplace for unique second-hand garments: every listed
//! item exists exactly once, so the moment one buyer is actively paying for
//! it, no other buyer may be allowed to purchase it, while any number of
//! buyers may still be browsing it or holding it in their bag. The
//! coordination substrate is a document store with push notifications, not a
//! transactional database, and this crate defines the abstractions the rest
//! of the workspace builds on:
//!
//! - [`store::DocumentStore`]: the document-store adapter boundary
//!   (last-write-wins documents, conditional writes, change feeds)
//! - [`document::Document`]: binary document codec with stable type tags
//! - [`reducer::Reducer`]: pure `(State, Action, Environment) -> Effects`
//!   business logic, driven by the runtime crate's `Store`
//! - [`effect::Effect`]: side-effect descriptions (delays, async work)
//! - [`environment::Clock`]: injected time, so expiry logic is testable
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell
//! - Explicit effects (no hidden I/O in reducers)
//! - Dependency injection via environment traits
//! - No cross-document transactions assumed anywhere

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod document;
pub mod effect;
pub mod environment;
pub mod reducer;
pub mod store;
