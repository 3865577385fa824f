//! Imperative shell around the checkout state machine.
//!
//! [`CheckoutSession`] owns the runtime [`Store`] driving one buyer's
//! checkout and exposes the handful of calls the surrounding views need:
//! enter, confirm/abandon from the expiry prompt, leave (wired by the host
//! to both component teardown and the page-hide event), the payment
//! hand-off, and the countdown value for display.

use crate::checkout::{
    CheckoutAction, CheckoutEnvironment, CheckoutPhase, CheckoutReducer, CheckoutState,
};
use crate::types::ProductId;
use garderobe_core::environment::Clock;
use garderobe_runtime::{DeadLetterQueue, Store, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long to wait for reservation acquisition to settle.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for release/persist effects on the exit paths.
const OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of entering checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutEntry {
    /// Items now exclusively held by this session.
    pub granted: Vec<ProductId>,
    /// Items that could not be reserved, with a displayable reason,
    /// including "someone else just reserved this" for races lost at entry.
    pub rejected: Vec<(ProductId, String)>,
}

/// One buyer's checkout session.
pub struct CheckoutSession {
    store: Store<CheckoutState, CheckoutAction, CheckoutEnvironment, CheckoutReducer>,
    clock: Arc<dyn Clock>,
    dead_letters: DeadLetterQueue<String>,
}

impl CheckoutSession {
    /// Create a session around the given environment.
    #[must_use]
    pub fn new(env: CheckoutEnvironment) -> Self {
        let clock = Arc::clone(&env.clock);
        let dead_letters = env.dead_letters.clone();
        Self {
            store: Store::new(CheckoutState::new(), CheckoutReducer::new(), env),
            clock,
            dead_letters,
        }
    }

    /// Enter checkout with the bag's items and wait for the reservations to
    /// settle.
    ///
    /// Items in `locked_now` are rejected up front; the rest are contended
    /// for with conditional writes, so the returned entry tells the caller
    /// exactly which items it holds and which it lost.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if acquisition does not settle in
    /// time, or [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn enter(
        &self,
        products: &[ProductId],
        locked_now: &HashSet<ProductId>,
    ) -> Result<CheckoutEntry, StoreError> {
        let action = CheckoutAction::EnterCheckout {
            products: products.to_vec(),
            locked_now: locked_now.iter().cloned().collect(),
        };

        let settled = self
            .store
            .send_and_wait_for(
                action,
                |a| matches!(a, CheckoutAction::ReservationSettled { .. }),
                SETTLE_TIMEOUT,
            )
            .await?;

        match settled {
            CheckoutAction::ReservationSettled { granted, rejected } => {
                Ok(CheckoutEntry { granted, rejected })
            },
            _ => Ok(CheckoutEntry::default()),
        }
    }

    /// Buyer answered "yes, keep going" on the expiry prompt.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store rejected the action.
    pub async fn confirm_continue(&self) -> Result<(), StoreError> {
        self.store.send(CheckoutAction::ConfirmContinue).await?;
        Ok(())
    }

    /// Buyer explicitly abandoned checkout; items return to the bag.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store rejected the action or the
    /// release did not complete in time.
    pub async fn abandon(&self) -> Result<(), StoreError> {
        let mut handle = self.store.send(CheckoutAction::AbandonCheckout).await?;
        handle.wait_with_timeout(OP_TIMEOUT).await
    }

    /// Checkout is being left by any path other than a successful payment
    /// redirect.
    ///
    /// Hosts wire this to BOTH the component-teardown path and the
    /// page-unload/page-hide events; either may fire without the other.
    /// Calling it twice is a no-op the second time.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store rejected the action or the
    /// release did not complete in time.
    pub async fn leave(&self) -> Result<(), StoreError> {
        let mut handle = self.store.send(CheckoutAction::LeaveCheckout).await?;
        handle.wait_with_timeout(OP_TIMEOUT).await
    }

    /// Hand off to the payment provider.
    ///
    /// Waits for the pending-payment list to be persisted before returning,
    /// so the caller can safely navigate away; the reservations stay alive
    /// through the external flow.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store rejected the action or
    /// persisting did not complete in time.
    pub async fn redirect_to_payment(&self) -> Result<(), StoreError> {
        let mut handle = self.store.send(CheckoutAction::RedirectToPayment).await?;
        handle.wait_with_timeout(OP_TIMEOUT).await
    }

    /// Control returned from the payment provider.
    ///
    /// On success the paid items' reservations are consumed; on failure
    /// they are released and returned to the bag. Returns the items that
    /// were settled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if settlement does not complete in
    /// time.
    pub async fn payment_returned(&self, success: bool) -> Result<Vec<ProductId>, StoreError> {
        let released = self
            .store
            .send_and_wait_for(
                CheckoutAction::PaymentReturned { success },
                |a| matches!(a, CheckoutAction::CheckoutReleased { .. }),
                OP_TIMEOUT,
            )
            .await?;

        match released {
            CheckoutAction::CheckoutReleased { products, .. } => Ok(products),
            _ => Ok(Vec::new()),
        }
    }

    /// Current phase.
    pub async fn phase(&self) -> CheckoutPhase {
        self.store.state(|s| s.phase).await
    }

    /// Items currently held by this session.
    pub async fn items(&self) -> Vec<ProductId> {
        self.store.state(|s| s.items.clone()).await
    }

    /// Items that could not be reserved, for the UI to surface.
    pub async fn rejected(&self) -> Vec<(ProductId, String)> {
        self.store.state(|s| s.rejected.clone()).await
    }

    /// Remaining countdown for display, `None` when no countdown runs.
    pub async fn remaining(&self) -> Option<chrono::Duration> {
        let now = self.clock.now();
        self.store.state(move |s| s.remaining(now)).await
    }

    /// Observe every action produced by effects (UI badge updates, tests).
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<CheckoutAction> {
        self.store.subscribe_actions()
    }

    /// Operations that failed even after retries, for inspection.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<String> {
        self.dead_letters.clone()
    }

    /// Gracefully shut the session down, waiting for in-flight effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// when the timeout expires.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.store.shutdown(timeout).await
    }
}
