//! Document codec and revision types.
//!
//! Documents are the unit of storage and of change notification: each one is
//! an independent last-write-wins record addressed by `(collection, key)`.
//! Payloads are serialized with `bincode`: compact, fast, and every consumer
//! of this store is a Rust service, so human-readability in the database is
//! not worth the size and speed cost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for document encoding and decoding.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Failed to serialize a document to bytes.
    #[error("Failed to encode document: {0}")]
    EncodingFailed(String),

    /// Failed to deserialize a document from bytes.
    #[error("Failed to decode document: {0}")]
    DecodingFailed(String),
}

/// A typed document that can be stored in a document collection.
///
/// Documents represent the current state of one ephemeral coordination fact
/// (a reservation, a bag-presence row, a viewer row). They are not archived:
/// a document exists only as long as the behavior it represents.
///
/// # Type Tags
///
/// [`Document::document_type`] returns a stable, versioned identifier
/// (`"Reservation.v1"`) so payloads can evolve without ambiguity.
///
/// # Examples
///
/// ```
/// use garderobe_core::document::Document;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct Badge { label: String }
///
/// impl Document for Badge {
///     fn document_type() -> &'static str {
///         "Badge.v1"
///     }
/// }
///
/// let badge = Badge { label: "vintage".to_string() };
/// let bytes = badge.encode().unwrap();
/// let back = Badge::decode(&bytes).unwrap();
/// assert_eq!(back.label, "vintage");
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable, versioned type identifier for this document kind.
    fn document_type() -> &'static str;

    /// Serialize this document to its binary payload.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::EncodingFailed`] if serialization fails.
    fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        bincode::serialize(self).map_err(|e| DocumentError::EncodingFailed(e.to_string()))
    }

    /// Deserialize a document from its binary payload.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DecodingFailed`] if the payload is not a
    /// valid encoding of this document type.
    fn decode(payload: &[u8]) -> Result<Self, DocumentError> {
        bincode::deserialize(payload).map_err(|e| DocumentError::DecodingFailed(e.to_string()))
    }
}

/// Document revision number for conditional writes.
///
/// Every successful write to a document produces a new revision. Revisions
/// exist only to support compare-and-swap writes ([`put_if`]); the store's
/// consistency model remains last-write-wins per document.
///
/// [`put_if`]: crate::store::DocumentStore::put_if
///
/// # Examples
///
/// ```
/// use garderobe_core::document::Revision;
///
/// let first = Revision::FIRST;
/// let second = first.next();
/// assert!(second > first);
/// assert_eq!(second.value(), 2);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// The lowest revision a store will ever assign.
    ///
    /// Stores may allocate revisions from a shared counter, so a freshly
    /// created document is not guaranteed to start here, only to start at
    /// or above it.
    pub const FIRST: Self = Self(1);

    /// Create a `Revision` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the revision number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next revision (current + 1).
    ///
    /// # Overflow Behavior
    ///
    /// Uses plain arithmetic; reaching `u64::MAX` rewrites of a single
    /// document is not a realistic concern.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Revision> for u64 {
    fn from(revision: Revision) -> Self {
        revision.0
    }
}

/// A stored document as returned by reads, queries, and change feeds.
///
/// Carries the storage key, the opaque binary payload, the revision produced
/// by the last write, and the store-observed write time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDocument {
    /// Storage key within the collection.
    pub key: String,
    /// Binary payload (see [`Document::encode`]).
    pub payload: Vec<u8>,
    /// Revision produced by the write that created this version.
    pub revision: Revision,
    /// When the store accepted the write.
    pub updated_at: DateTime<Utc>,
}

impl RawDocument {
    /// Decode the payload into a typed document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::DecodingFailed`] if the payload does not
    /// decode as `D`.
    pub fn decode<D: Document>(&self) -> Result<D, DocumentError> {
        D::decode(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: String,
        count: u32,
    }

    impl Document for Probe {
        fn document_type() -> &'static str {
            "Probe.v1"
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn encode_decode_round_trip() {
        let probe = Probe {
            id: "p-1".to_string(),
            count: 3,
        };
        let bytes = probe.encode().unwrap();
        let back = Probe::decode(&bytes).unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn decode_garbage_fails() {
        let result = Probe::decode(&[0xff, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn revision_ordering() {
        let r1 = Revision::FIRST;
        let r2 = r1.next();
        let r3 = r2.next();

        assert!(r1 < r2);
        assert!(r2 < r3);
        assert_eq!(r3.value(), 3);
    }

    #[test]
    fn revision_from_u64() {
        let revision = Revision::from(42_u64);
        assert_eq!(revision.value(), 42);

        let raw: u64 = revision.into();
        assert_eq!(raw, 42);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn raw_document_decode() {
        let probe = Probe {
            id: "p-2".to_string(),
            count: 9,
        };
        let raw = RawDocument {
            key: "p-2".to_string(),
            payload: probe.encode().unwrap(),
            revision: Revision::FIRST,
            updated_at: Utc::now(),
        };
        assert_eq!(raw.decode::<Probe>().unwrap(), probe);
    }
}
