//! Document store abstraction with push-notification change feeds.
//!
//! This module defines the [`DocumentStore`] trait: the only boundary between
//! the coordination logic and whatever document database actually hosts the
//! data. The store is a passive document host: no server-side logic runs
//! synchronously with client mutations; coordination happens entirely through
//! document writes fanning out to subscribers.
//!
//! # Consistency Model
//!
//! - **Last-write-wins per document.** No cross-document transactions.
//! - **Conditional writes.** [`DocumentStore::put_if`] and
//!   [`DocumentStore::delete_if`] check a [`Precondition`] against the
//!   document's current [`Revision`] atomically for that one document. This
//!   is the mechanism that makes an exclusive reservation actually exclusive:
//!   two near-simultaneous create-if-absent writes for the same key admit
//!   exactly one winner.
//! - **At-least-once change delivery.** A subscriber that falls behind
//!   receives [`DocumentStoreError::Lagged`] and must recover by re-querying;
//!   readers therefore always recompute from current documents rather than
//!   diffing individual changes.
//!
//! # Example
//!
//! ```rust,ignore
//! use garderobe_core::store::{DocumentStore, Precondition};
//! use futures::StreamExt;
//!
//! async fn example(store: &dyn DocumentStore) -> Result<(), Box<dyn std::error::Error>> {
//!     // Create-if-absent: the losing writer gets PreconditionFailed.
//!     store.put_if("reservations", "garment-1", payload, Precondition::Absent).await?;
//!
//!     // Watch a collection for changes.
//!     let mut changes = store.watch("reservations", "").await?;
//!     while let Some(change) = changes.next().await {
//!         println!("changed: {:?}", change?.key());
//!     }
//!     Ok(())
//! }
//! ```

use crate::document::{RawDocument, Revision};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during document store operations.
#[derive(Error, Debug, Clone)]
pub enum DocumentStoreError {
    /// Failed to connect to the store.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A write (put or delete) failed.
    #[error("Write failed for '{collection}/{key}': {reason}")]
    WriteFailed {
        /// Collection the write targeted.
        collection: String,
        /// Key the write targeted.
        key: String,
        /// Why the write failed.
        reason: String,
    },

    /// A conditional write found the document in a different state than the
    /// caller required.
    #[error("Precondition failed for '{collection}/{key}'")]
    PreconditionFailed {
        /// Collection the write targeted.
        collection: String,
        /// Key the write targeted.
        key: String,
    },

    /// A read or query failed.
    #[error("Query failed for collection '{collection}': {reason}")]
    QueryFailed {
        /// Collection the query targeted.
        collection: String,
        /// Why the query failed.
        reason: String,
    },

    /// Failed to open a change feed.
    #[error("Subscription failed for collection '{collection}': {reason}")]
    SubscriptionFailed {
        /// Collection the subscription targeted.
        collection: String,
        /// Why the subscription failed.
        reason: String,
    },

    /// A change-feed subscriber fell behind and missed notifications.
    ///
    /// The subscriber must recover by re-querying the collection.
    #[error("Change feed lagged, {missed} notifications dropped")]
    Lagged {
        /// Number of notifications that were dropped.
        missed: u64,
    },

    /// Generic error for other failures.
    #[error("Document store error: {0}")]
    Other(String),
}

/// Precondition for a conditional write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// The document must not currently exist (create-if-absent).
    Absent,
    /// The document must currently be at exactly this revision
    /// (compare-and-swap).
    Revision(Revision),
}

/// A single change observed on a collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentChange {
    /// A document was created or overwritten.
    Put(RawDocument),
    /// A document was deleted.
    Delete {
        /// Key of the deleted document.
        key: String,
    },
}

impl DocumentChange {
    /// The key of the changed document.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put(doc) => &doc.key,
            Self::Delete { key } => key,
        }
    }
}

/// Stream of changes from a [`DocumentStore::watch`] subscription.
pub type ChangeStream =
    Pin<Box<dyn Stream<Item = Result<DocumentChange, DocumentStoreError>> + Send>>;

/// Boxed future returned by store operations.
///
/// Explicit `Pin<Box<dyn Future>>` returns (instead of `async fn`) keep the
/// trait dyn-compatible, so coordination components can hold
/// `Arc<dyn DocumentStore>` and remain agnostic of the backing store.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DocumentStoreError>> + Send + 'a>>;

/// Trait for document store implementations.
///
/// All operations are asynchronous and non-blocking; none of them may block
/// other in-flight operations. Implementations must be `Send + Sync` so a
/// single store handle can be shared across every component of a session.
///
/// # Keys and Prefix Queries
///
/// The store has no secondary indexes. Equality queries over a document field
/// are expressed as key-prefix scans over composite keys: presence rows are
/// keyed `"{product}::{holder}"`, so "all presence rows for product P" is
/// `query_prefix("cart-presence", "P::")`.
pub trait DocumentStore: Send + Sync {
    /// Read a single document.
    ///
    /// Returns `Ok(None)` if the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::QueryFailed`] if the read fails.
    fn get<'a>(&'a self, collection: &'a str, key: &'a str)
    -> StoreFuture<'a, Option<RawDocument>>;

    /// Unconditionally create or overwrite a document (last-write-wins).
    ///
    /// Returns the revision produced by the write. The change is fanned out
    /// to all watchers of the collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::WriteFailed`] if the write fails.
    fn put<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        payload: Vec<u8>,
    ) -> StoreFuture<'a, Revision>;

    /// Conditionally create or overwrite a document.
    ///
    /// The write succeeds only if the document's current state matches
    /// `precondition`. The check-and-write is atomic for the one document.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::PreconditionFailed`] if the document exists
    ///   when [`Precondition::Absent`] was required, or is not at the
    ///   required revision.
    /// - [`DocumentStoreError::WriteFailed`] for other failures.
    fn put_if<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        payload: Vec<u8>,
        precondition: Precondition,
    ) -> StoreFuture<'a, Revision>;

    /// Delete a document. Deleting an absent document is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::WriteFailed`] if the delete fails.
    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, ()>;

    /// Delete a document only if it is still at the given revision.
    ///
    /// Deleting an absent document is a no-op (the desired end state already
    /// holds).
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::PreconditionFailed`] if the document exists at
    ///   a different revision.
    /// - [`DocumentStoreError::WriteFailed`] for other failures.
    fn delete_if<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        expected: Revision,
    ) -> StoreFuture<'a, ()>;

    /// Return every document in `collection` whose key starts with `prefix`.
    ///
    /// An empty prefix returns the whole collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::QueryFailed`] if the query fails.
    fn query_prefix<'a>(
        &'a self,
        collection: &'a str,
        prefix: &'a str,
    ) -> StoreFuture<'a, Vec<RawDocument>>;

    /// Open a change feed over `collection`, filtered to keys starting with
    /// `prefix`.
    ///
    /// The stream yields [`DocumentChange`] items as writes land. A slow
    /// subscriber receives [`DocumentStoreError::Lagged`] and should
    /// re-query to recover.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::SubscriptionFailed`] if the feed cannot
    /// be opened.
    fn watch<'a>(&'a self, collection: &'a str, prefix: &'a str) -> StoreFuture<'a, ChangeStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn document_change_key() {
        let put = DocumentChange::Put(RawDocument {
            key: "garment-1".to_string(),
            payload: vec![1, 2],
            revision: Revision::FIRST,
            updated_at: Utc::now(),
        });
        assert_eq!(put.key(), "garment-1");

        let delete = DocumentChange::Delete {
            key: "garment-2".to_string(),
        };
        assert_eq!(delete.key(), "garment-2");
    }

    #[test]
    fn precondition_equality() {
        assert_eq!(Precondition::Absent, Precondition::Absent);
        assert_eq!(
            Precondition::Revision(Revision::new(3)),
            Precondition::Revision(Revision::new(3))
        );
        assert_ne!(
            Precondition::Absent,
            Precondition::Revision(Revision::FIRST)
        );
    }
}
