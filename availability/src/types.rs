//! Domain types for the availability coordination subsystem.
//!
//! This module contains the identifier newtypes, the per-session identity
//! context, and the three ephemeral document kinds that drive coordination:
//! [`Reservation`] (hard lock), [`CartPresence`] (soft "in somebody's bag"
//! signal), and [`Viewer`] (advisory "N people looking at this" row). A
//! fourth document, [`PendingPayment`], carries the checkout item list
//! across the external payment redirect.

use chrono::{DateTime, Utc};
use garderobe_core::document::Document;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Collection names used by the coordination documents.
pub mod collections {
    /// Exclusive reservations, keyed by product ID.
    pub const RESERVATIONS: &str = "reservations";
    /// Bag presence rows, keyed by `"{product}::{holder}"`.
    pub const CART_PRESENCE: &str = "cart-presence";
    /// Viewer rows, keyed by `"{product}::{viewer}"`.
    pub const VIEWERS: &str = "viewers";
    /// Pending payment lists, keyed by holder ID.
    pub const PENDING_PAYMENTS: &str = "pending-payments";
}

/// Separator between segments of a composite storage key.
pub const KEY_SEPARATOR: &str = "::";

/// Extract the product segment from a composite `"{product}::{rest}"` key.
///
/// Returns `None` for keys without a separator.
#[must_use]
pub fn product_segment(key: &str) -> Option<&str> {
    key.split_once(KEY_SEPARATOR).map(|(product, _)| product)
}

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

macro_rules! string_id {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from application-controlled data.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether this identifier is empty.
            ///
            /// Empty identifiers are never valid; operations receiving one
            /// treat the whole call as a no-op.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Convert into the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(ParseIdError(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identifier of a unique garment listing, assigned by the catalog
    /// service.
    ///
    /// Products here have quantity exactly one; a `ProductId` is therefore
    /// also the key of the product's (at most one) live [`Reservation`].
    ProductId
}

string_id! {
    /// Identity that owns reservations and bag presence: an authenticated
    /// user ID, or an anonymous per-session token for signed-out buyers.
    ///
    /// The holder named in a document is the only actor permitted to renew
    /// or delete it.
    HolderId
}

string_id! {
    /// Identity counted by the viewer counter: an anonymous session token
    /// or an authenticated user ID. Carries no ownership semantics.
    ViewerId
}

/// Explicit per-session identity, passed into every coordination component.
///
/// There are deliberately no module-level identity singletons: each
/// connected session constructs its own context from the identity service
/// and hands it to the managers it creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    /// The identity owning reservations and presence rows.
    pub holder: HolderId,
    /// The identity counted by viewer counters.
    pub viewer: ViewerId,
}

impl SessionContext {
    /// Create a session context for an identified holder.
    #[must_use]
    pub const fn new(holder: HolderId, viewer: ViewerId) -> Self {
        Self { holder, viewer }
    }

    /// Context for a signed-in user: holder and viewer share the user ID.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        let id = user_id.into();
        Self {
            holder: HolderId::new(id.clone()),
            viewer: ViewerId::new(id),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Exclusive "about to be paid for" lock on one product.
///
/// One per product, keyed by the product ID. A reservation is **live** iff
/// `expires_at` is in the future relative to the observer's clock; there is
/// no server-side expiry sweep, so an expired-but-undeleted document is
/// simply treated as absent by every reader until something overwrites or
/// deletes it.
///
/// Created when the holder enters checkout, renewed by heartbeat while they
/// remain there, deleted when they leave, and kept alive (on TTL alone)
/// through the external payment redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The reserved product.
    pub product_id: ProductId,
    /// Who holds the reservation.
    pub holder_id: HolderId,
    /// When the reservation stops being live.
    pub expires_at: DateTime<Utc>,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Storage key for a product's reservation.
    #[must_use]
    pub fn storage_key(product: &ProductId) -> &str {
        product.as_str()
    }

    /// Whether this reservation is live on the observer's clock.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

impl Document for Reservation {
    fn document_type() -> &'static str {
        "Reservation.v1"
    }
}

/// "This identified user currently has this item in their bag, outside of
/// checkout."
///
/// One per (product, holder). Presence is a weak signal: it informs other
/// buyers that the item is wanted, but never blocks a purchase; only a live
/// [`Reservation`] does. Presence and reservation are mutually exclusive per
/// holder: entering checkout converts presence into a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartPresence {
    /// The bagged product.
    pub product_id: ProductId,
    /// Whose bag it is in.
    pub holder_id: HolderId,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

impl CartPresence {
    /// Storage key for one holder's presence on one product.
    #[must_use]
    pub fn storage_key(product: &ProductId, holder: &HolderId) -> String {
        format!("{product}{KEY_SEPARATOR}{holder}")
    }

    /// Key prefix matching every holder's presence on one product.
    #[must_use]
    pub fn product_prefix(product: &ProductId) -> String {
        format!("{product}{KEY_SEPARATOR}")
    }
}

impl Document for CartPresence {
    fn document_type() -> &'static str {
        "CartPresence.v1"
    }
}

/// Advisory "someone is looking at this product right now" row.
///
/// One per (product, viewer-session). No ownership checks, no TTL; cleanup
/// relies entirely on page-lifecycle hooks and is best-effort: a crashed
/// client leaves a stale row until an external sweep collects it. Excluded
/// from availability computation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    /// The viewed product.
    pub product_id: ProductId,
    /// Who is looking.
    pub viewer_id: ViewerId,
    /// Last time this viewer was seen on the page.
    pub last_seen: DateTime<Utc>,
}

impl Viewer {
    /// Storage key for one viewer on one product.
    #[must_use]
    pub fn storage_key(product: &ProductId, viewer: &ViewerId) -> String {
        format!("{product}{KEY_SEPARATOR}{viewer}")
    }

    /// Key prefix matching every viewer of one product.
    #[must_use]
    pub fn product_prefix(product: &ProductId) -> String {
        format!("{product}{KEY_SEPARATOR}")
    }
}

impl Document for Viewer {
    fn document_type() -> &'static str {
        "Viewer.v1"
    }
}

/// The items a holder is actually paying for, persisted across the external
/// payment redirect.
///
/// Written just before handing off to the payment provider; read back when
/// control returns (on success and failure alike) so the right reservations
/// can be consumed or released. Keyed by holder ID; a holder has at most
/// one payment in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    /// Who is paying.
    pub holder_id: HolderId,
    /// The products being paid for.
    pub product_ids: Vec<ProductId>,
    /// When the redirect was initiated.
    pub created_at: DateTime<Utc>,
}

impl PendingPayment {
    /// Storage key for a holder's in-flight payment.
    #[must_use]
    pub fn storage_key(holder: &HolderId) -> &str {
        holder.as_str()
    }
}

impl Document for PendingPayment {
    fn document_type() -> &'static str {
        "PendingPayment.v1"
    }
}
