//! Dependency-injection traits for reducer environments.
//!
//! All external dependencies reach reducers and coordination components
//! through traits injected via an environment or constructor parameter,
//! never through module-level singletons. Time in particular is injected:
//! reservation liveness is decided by comparing `expires_at` against the
//! observer's clock at the moment a change notification arrives, so tests
//! must be able to control that clock.

use chrono::{DateTime, Utc};

/// Clock trait, abstracting time for testability.
///
/// # Examples
///
/// ```
/// use garderobe_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let now = clock.now();
/// assert!(clock.now() >= now);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
