//! Configuration for the availability coordination subsystem.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Durations are configured in milliseconds so tests can run the whole
//! reservation lifecycle in well under a second.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Timing configuration for reservations and the checkout state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    /// Reservation time-to-live in milliseconds (default: 10 minutes).
    ///
    /// The sole timeout authority: a reservation is live iff its
    /// `expires_at` is within this window of its last write, judged on the
    /// observer's clock.
    pub reservation_ttl_ms: u64,

    /// Heartbeat renewal period in milliseconds (default: 2 minutes).
    ///
    /// A safe fraction of the TTL: several heartbeats can be missed before
    /// the reservation lapses.
    pub heartbeat_interval_ms: u64,

    /// Grace window before auto-release once the countdown hits zero,
    /// in milliseconds (default: 30 seconds). A UX nicety, not a
    /// correctness mechanism.
    pub release_grace_ms: u64,
}

impl AvailabilityConfig {
    /// Create a configuration with explicit values.
    #[must_use]
    pub const fn new(
        reservation_ttl_ms: u64,
        heartbeat_interval_ms: u64,
        release_grace_ms: u64,
    ) -> Self {
        Self {
            reservation_ttl_ms,
            heartbeat_interval_ms,
            release_grace_ms,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Recognized variables: `RESERVATION_TTL_MS`, `RESERVATION_HEARTBEAT_MS`,
    /// `RELEASE_GRACE_MS`. Missing or unparseable values fall back to the
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_ttl_ms: env::var("RESERVATION_TTL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reservation_ttl_ms),
            heartbeat_interval_ms: env::var("RESERVATION_HEARTBEAT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.heartbeat_interval_ms),
            release_grace_ms: env::var("RELEASE_GRACE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.release_grace_ms),
        }
    }

    /// Reservation TTL as a [`Duration`].
    #[must_use]
    pub const fn reservation_ttl(&self) -> Duration {
        Duration::from_millis(self.reservation_ttl_ms)
    }

    /// Reservation TTL as a [`chrono::Duration`] for expiry arithmetic.
    #[must_use]
    pub fn reservation_ttl_chrono(&self) -> chrono::Duration {
        // Note: Wrap is unreachable for any configured TTL (i64 millis
        // covers ~292 million years)
        #[allow(clippy::cast_possible_wrap)]
        chrono::Duration::milliseconds(self.reservation_ttl_ms as i64)
    }

    /// Heartbeat renewal period as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Auto-release grace window as a [`Duration`].
    #[must_use]
    pub const fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }

    /// Auto-release grace window as a [`chrono::Duration`].
    #[must_use]
    pub fn release_grace_chrono(&self) -> chrono::Duration {
        // Note: Wrap is unreachable for any configured grace window
        #[allow(clippy::cast_possible_wrap)]
        chrono::Duration::milliseconds(self.release_grace_ms as i64)
    }
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_ms: 10 * 60 * 1000,
            heartbeat_interval_ms: 2 * 60 * 1000,
            release_grace_ms: 30 * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reservation_lifecycle() {
        let config = AvailabilityConfig::default();
        assert_eq!(config.reservation_ttl(), Duration::from_secs(600));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(120));
        assert_eq!(config.release_grace(), Duration::from_secs(30));
    }

    #[test]
    fn heartbeat_is_safe_fraction_of_ttl() {
        let config = AvailabilityConfig::default();
        assert!(config.heartbeat_interval_ms * 2 < config.reservation_ttl_ms);
    }

    #[test]
    fn chrono_ttl_matches_std() {
        let config = AvailabilityConfig::new(1500, 500, 200);
        assert_eq!(
            config.reservation_ttl_chrono().num_milliseconds(),
            1500
        );
    }
}
