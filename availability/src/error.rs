//! Error types for the availability components.

use garderobe_core::document::DocumentError;
use garderobe_core::store::DocumentStoreError;
use thiserror::Error;

/// Errors surfaced by availability components.
///
/// Most store hiccups are swallowed where the contract calls for silent
/// no-ops (ownership conflicts, heartbeat extension drops); this error type
/// covers the operations whose callers need to know a write did not land:
/// presence updates, viewer rows, and the one-shot release paths that retry.
#[derive(Error, Debug)]
pub enum AvailabilityError {
    /// The document store rejected or failed an operation.
    #[error(transparent)]
    Store(#[from] DocumentStoreError),

    /// A document failed to encode or decode.
    #[error(transparent)]
    Document(#[from] DocumentError),
}
