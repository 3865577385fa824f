//! # Garderobe Memstore
//!
//! In-memory [`DocumentStore`] implementation with broadcast change feeds.
//!
//! This is the store adapter used by unit tests, integration tests, and the
//! demo binary. It implements the full adapter contract (last-write-wins
//! documents, conditional writes, key-prefix queries, and push-notification
//! change feeds) so every piece of coordination logic can be exercised
//! without a hosted document database. An adapter for a real document host
//! would be a sibling crate implementing the same trait.
//!
//! # Semantics
//!
//! - Revisions come from one process-wide monotonic counter, so a deleted
//!   and recreated document can never be confused with its earlier self by
//!   a compare-and-swap write.
//! - Conditional writes are atomic: the precondition check and the write
//!   happen under one lock.
//! - Change feeds are per collection with bounded buffers; a subscriber that
//!   falls behind observes [`DocumentStoreError::Lagged`] and is expected to
//!   re-query.
//!
//! # Example
//!
//! ```
//! use garderobe_memstore::MemoryStore;
//! use garderobe_core::store::{DocumentStore, Precondition};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), garderobe_core::store::DocumentStoreError> {
//! let store = MemoryStore::new();
//! store.put("reservations", "garment-1", vec![1, 2, 3]).await?;
//!
//! let doc = store.get("reservations", "garment-1").await?;
//! assert!(doc.is_some());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use garderobe_core::document::{RawDocument, Revision};
use garderobe_core::environment::{Clock, SystemClock};
use garderobe_core::store::{
    ChangeStream, DocumentChange, DocumentStore, DocumentStoreError, Precondition, StoreFuture,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Buffered change notifications per collection before a slow subscriber
/// starts lagging.
const FEED_CAPACITY: usize = 256;

#[derive(Clone)]
struct StoredEntry {
    payload: Vec<u8>,
    revision: Revision,
    updated_at: DateTime<Utc>,
}

struct Collection {
    docs: BTreeMap<String, StoredEntry>,
    feed: broadcast::Sender<DocumentChange>,
}

impl Collection {
    fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            docs: BTreeMap::new(),
            feed,
        }
    }

    fn raw(&self, key: &str) -> Option<RawDocument> {
        self.docs.get(key).map(|entry| RawDocument {
            key: key.to_string(),
            payload: entry.payload.clone(),
            revision: entry.revision,
            updated_at: entry.updated_at,
        })
    }

    fn publish(&self, change: DocumentChange) {
        // No subscribers is fine; the send just reports zero receivers
        let _ = self.feed.send(change);
    }
}

/// In-memory document store with per-collection change feeds.
///
/// Cloning is cheap and all clones share the same documents and feeds, so a
/// single `MemoryStore` can back every session in a test.
#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    next_revision: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store using the system clock for write timestamps.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            next_revision: Arc::new(AtomicU64::new(1)),
            clock,
        }
    }

    fn allocate_revision(&self) -> Revision {
        Revision::new(self.next_revision.fetch_add(1, Ordering::SeqCst))
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn put_sync(
        &self,
        collection: &str,
        key: &str,
        payload: Vec<u8>,
        precondition: Option<Precondition>,
    ) -> Result<Revision, DocumentStoreError> {
        let mut collections = self.write_lock();
        let coll = collections
            .entry(collection.to_string())
            .or_insert_with(Collection::new);

        if let Some(precondition) = precondition {
            let current = coll.docs.get(key).map(|entry| entry.revision);
            let satisfied = match (precondition, current) {
                (Precondition::Absent, None) => true,
                (Precondition::Revision(expected), Some(actual)) => expected == actual,
                _ => false,
            };
            if !satisfied {
                tracing::debug!(
                    collection,
                    key,
                    ?precondition,
                    ?current,
                    "Conditional write rejected"
                );
                return Err(DocumentStoreError::PreconditionFailed {
                    collection: collection.to_string(),
                    key: key.to_string(),
                });
            }
        }

        let revision = self.allocate_revision();
        let entry = StoredEntry {
            payload,
            revision,
            updated_at: self.clock.now(),
        };
        coll.docs.insert(key.to_string(), entry);

        if let Some(raw) = coll.raw(key) {
            coll.publish(DocumentChange::Put(raw));
        }

        Ok(revision)
    }

    fn delete_sync(
        &self,
        collection: &str,
        key: &str,
        expected: Option<Revision>,
    ) -> Result<(), DocumentStoreError> {
        let mut collections = self.write_lock();
        let Some(coll) = collections.get_mut(collection) else {
            // Nothing stored in this collection yet; absent is the desired
            // end state
            return Ok(());
        };

        let Some(current) = coll.docs.get(key).map(|entry| entry.revision) else {
            return Ok(());
        };

        if let Some(expected) = expected {
            if expected != current {
                return Err(DocumentStoreError::PreconditionFailed {
                    collection: collection.to_string(),
                    key: key.to_string(),
                });
            }
        }

        coll.docs.remove(key);
        coll.publish(DocumentChange::Delete {
            key: key.to_string(),
        });
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> StoreFuture<'a, Option<RawDocument>> {
        Box::pin(async move {
            let collections = self
                .collections
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(collections
                .get(collection)
                .and_then(|coll| coll.raw(key)))
        })
    }

    fn put<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        payload: Vec<u8>,
    ) -> StoreFuture<'a, Revision> {
        Box::pin(async move { self.put_sync(collection, key, payload, None) })
    }

    fn put_if<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        payload: Vec<u8>,
        precondition: Precondition,
    ) -> StoreFuture<'a, Revision> {
        Box::pin(async move { self.put_sync(collection, key, payload, Some(precondition)) })
    }

    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.delete_sync(collection, key, None) })
    }

    fn delete_if<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        expected: Revision,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.delete_sync(collection, key, Some(expected)) })
    }

    fn query_prefix<'a>(
        &'a self,
        collection: &'a str,
        prefix: &'a str,
    ) -> StoreFuture<'a, Vec<RawDocument>> {
        Box::pin(async move {
            let collections = self
                .collections
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(coll) = collections.get(collection) else {
                return Ok(Vec::new());
            };

            // BTreeMap range scan: keys sharing the prefix are contiguous
            let docs = coll
                .docs
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .filter_map(|(key, _)| coll.raw(key))
                .collect();
            Ok(docs)
        })
    }

    fn watch<'a>(&'a self, collection: &'a str, prefix: &'a str) -> StoreFuture<'a, ChangeStream> {
        Box::pin(async move {
            let rx = {
                let mut collections = self.write_lock();
                collections
                    .entry(collection.to_string())
                    .or_insert_with(Collection::new)
                    .feed
                    .subscribe()
            };

            let prefix = prefix.to_string();
            let stream = async_stream::stream! {
                let mut rx = rx;
                loop {
                    match rx.recv().await {
                        Ok(change) => {
                            if change.key().starts_with(&prefix) {
                                yield Ok(change);
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            yield Err(DocumentStoreError::Lagged { missed });
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            Ok(Box::pin(stream) as ChangeStream)
        })
    }
}
