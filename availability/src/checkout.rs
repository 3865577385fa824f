//! Checkout timer and state machine.
//!
//! One reducer per checkout session drives the whole reservation lifecycle:
//! entering checkout converts bag presence into reservations, a countdown
//! displays the remaining TTL, heartbeats renew the lock every couple of
//! minutes, and every exit path (explicit cancel, grace timeout, tab
//! close) releases the reservations and restores bag presence. The one
//! exception is a successful redirect to the payment provider, which must
//! leave the reservations standing (on TTL alone) and persist the item list
//! so the return path can consume or release them.
//!
//! # Timer Epochs
//!
//! Delayed actions ([`Effect::Delay`]) cannot be cancelled, so every
//! scheduled countdown and grace timer carries the value of
//! `CheckoutState::timer_epoch` at scheduling time. Any state change that
//! supersedes running timers bumps the epoch; a timer that fires with a
//! stale epoch is ignored. The heartbeat chain needs no epoch: each tick
//! checks the phase and simply stops rescheduling once the session is no
//! longer active.

use crate::config::AvailabilityConfig;
use crate::error::AvailabilityError;
use crate::presence::PresenceTracker;
use crate::reservations::ReservationManager;
use crate::types::{PendingPayment, ProductId, SessionContext, collections};
use chrono::{DateTime, Utc};
use garderobe_core::document::Document;
use garderobe_core::environment::Clock;
use garderobe_core::store::DocumentStore;
use garderobe_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use garderobe_macros::Action;
use garderobe_runtime::{DeadLetterQueue, RetryPolicy, retry_with_backoff};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// State
// ============================================================================

/// Buyer-facing phase of the checkout session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutPhase {
    /// No checkout in progress.
    Idle,
    /// Reservations have been requested but not yet settled.
    Reserving,
    /// Items are exclusively held; the countdown is running.
    Active,
    /// The countdown hit zero; a short grace window is running before
    /// auto-release, and the buyer is being asked to confirm intent.
    Warning,
    /// Control was handed to the external payment provider; reservations
    /// persist on TTL alone and release-on-leave is suppressed.
    RedirectingToPayment,
}

/// State of one checkout session.
#[derive(Clone, Debug)]
pub struct CheckoutState {
    /// Current phase.
    pub phase: CheckoutPhase,
    /// Items exclusively held by this session.
    pub items: Vec<ProductId>,
    /// Items that could not be reserved, with a displayable reason.
    pub rejected: Vec<(ProductId, String)>,
    /// Countdown target shown to the buyer while `Active`.
    pub deadline: Option<DateTime<Utc>>,
    /// Auto-release target while in `Warning`.
    pub grace_deadline: Option<DateTime<Utc>>,
    /// Current timer generation; stale delayed actions are ignored.
    pub timer_epoch: u64,
    /// Latched once a payment redirect succeeds; suppresses
    /// release-on-leave.
    pub redirected: bool,
}

impl CheckoutState {
    /// Fresh idle state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: CheckoutPhase::Idle,
            items: Vec::new(),
            rejected: Vec::new(),
            deadline: None,
            grace_deadline: None,
            timer_epoch: 0,
            redirected: false,
        }
    }

    /// Remaining countdown relative to `now`, clamped at zero.
    ///
    /// `None` when no countdown is running.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.deadline
            .map(|deadline| (deadline - now).max(chrono::Duration::zero()))
    }

    fn bump_epoch(&mut self) -> u64 {
        self.timer_epoch += 1;
        self.timer_epoch
    }

    fn clear_timers(&mut self) {
        self.bump_epoch();
        self.deadline = None;
        self.grace_deadline = None;
    }
}

impl Default for CheckoutState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Actions for the checkout state machine.
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum CheckoutAction {
    /// Enter checkout with the bag's items. `locked_now` is the observer's
    /// current `locked_by_others` set; items in it are not purchasable and
    /// are rejected up front.
    #[command]
    EnterCheckout {
        /// Items the buyer wants to pay for.
        products: Vec<ProductId>,
        /// Items currently hard-locked by other buyers.
        locked_now: Vec<ProductId>,
    },

    /// Periodic renewal while the session stays in checkout.
    #[command]
    HeartbeatTick,

    /// The displayed countdown reached zero.
    #[command]
    CountdownExpired {
        /// Timer generation this expiry belongs to.
        epoch: u64,
    },

    /// Buyer confirmed continued intent from the expiry prompt.
    #[command]
    ConfirmContinue,

    /// Buyer explicitly gave up on checkout.
    #[command]
    AbandonCheckout,

    /// The auto-release grace window ran out.
    #[command]
    GraceExpired {
        /// Timer generation this expiry belongs to.
        epoch: u64,
    },

    /// Checkout is being left by any path other than a successful payment
    /// redirect: component teardown, tab close, navigation away. Wired to
    /// both the teardown path and the page-hide event; either may fire
    /// without the other, and the second invocation is a no-op.
    #[command]
    LeaveCheckout,

    /// Hand off to the external payment provider.
    #[command]
    RedirectToPayment,

    /// Control returned from the payment provider.
    #[command]
    PaymentReturned {
        /// Whether the provider reported a completed payment.
        success: bool,
    },

    /// Reservation acquisition finished.
    #[event]
    ReservationSettled {
        /// Items now exclusively held.
        granted: Vec<ProductId>,
        /// Items that could not be reserved, with a displayable reason.
        rejected: Vec<(ProductId, String)>,
    },

    /// Reservations were released (and possibly returned to the bag).
    #[event]
    CheckoutReleased {
        /// The released items.
        products: Vec<ProductId>,
        /// Whether bag presence was restored for them.
        restored_to_bag: bool,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies for the checkout state machine.
#[derive(Clone)]
pub struct CheckoutEnvironment {
    /// Clock for countdown arithmetic.
    pub clock: Arc<dyn Clock>,
    /// Reservation lock operations.
    pub reservations: ReservationManager,
    /// Bag presence operations.
    pub presence: PresenceTracker,
    /// Raw store access for the pending-payment document.
    pub store: Arc<dyn DocumentStore>,
    /// Timing configuration.
    pub config: AvailabilityConfig,
    /// Retry policy for one-shot release and persist operations.
    pub retry_policy: RetryPolicy,
    /// Parking lot for releases that failed even after retries.
    pub dead_letters: DeadLetterQueue<String>,
}

impl CheckoutEnvironment {
    /// Build an environment for one session.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
        session: SessionContext,
    ) -> Self {
        let reservations = ReservationManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config,
            session.clone(),
        );
        let presence = PresenceTracker::new(Arc::clone(&store), Arc::clone(&clock), session);

        Self {
            clock,
            reservations,
            presence,
            store,
            config,
            retry_policy: RetryPolicy::default(),
            dead_letters: DeadLetterQueue::new(100),
        }
    }

    /// The session identity this environment acts for.
    #[must_use]
    pub const fn session(&self) -> &SessionContext {
        self.reservations.session()
    }
}

// ============================================================================
// Reducer
// ============================================================================

type Effects = SmallVec<[Effect<CheckoutAction>; 4]>;

/// Reducer for the checkout state machine.
#[derive(Clone, Debug, Default)]
pub struct CheckoutReducer;

impl CheckoutReducer {
    /// Creates a new `CheckoutReducer`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Clear presence for the purchasable items, try to reserve them, and
    /// feed the outcome back as `ReservationSettled`.
    fn settle_effect(
        env: &CheckoutEnvironment,
        purchasable: Vec<ProductId>,
        pre_rejected: Vec<(ProductId, String)>,
    ) -> Effect<CheckoutAction> {
        let presence = env.presence.clone();
        let reservations = env.reservations.clone();

        Effect::Future(Box::pin(async move {
            presence.clear_present_batch(&purchasable).await;

            let report = reservations.reserve(&purchasable).await;
            let mut rejected = pre_rejected;
            rejected.extend(
                report
                    .rejected
                    .into_iter()
                    .map(|(product, rejection)| (product, rejection.to_string())),
            );

            Some(CheckoutAction::ReservationSettled {
                granted: report.granted,
                rejected,
            })
        }))
    }

    /// Renew the reservations; failures wait for the next heartbeat.
    fn extend_effect(env: &CheckoutEnvironment, items: Vec<ProductId>) -> Effect<CheckoutAction> {
        let reservations = env.reservations.clone();
        Effect::Future(Box::pin(async move {
            reservations.extend(&items).await;
            None
        }))
    }

    /// Release the reservations and optionally restore bag presence.
    ///
    /// This is a one-shot path (there is no later heartbeat to lean on), so
    /// transient store failures are retried and, if they persist, parked in
    /// the dead letter queue for inspection.
    fn release_effect(
        env: &CheckoutEnvironment,
        items: Vec<ProductId>,
        restore_to_bag: bool,
    ) -> Effect<CheckoutAction> {
        let reservations = env.reservations.clone();
        let presence = env.presence.clone();
        let policy = env.retry_policy.clone();
        let dead_letters = env.dead_letters.clone();

        Effect::Future(Box::pin(async move {
            let outcome = retry_with_backoff(policy.clone(), || {
                let reservations = reservations.clone();
                let presence = presence.clone();
                let items = items.clone();
                async move {
                    reservations.release(&items).await?;
                    if restore_to_bag {
                        presence.set_present_batch(&items).await?;
                    }
                    Ok::<(), AvailabilityError>(())
                }
            })
            .await;

            if let Err(error) = outcome {
                dead_letters.push(
                    format!("release {} checkout item(s)", items.len()),
                    error.to_string(),
                    policy.max_retries,
                );
            }

            Some(CheckoutAction::CheckoutReleased {
                products: items,
                restored_to_bag: restore_to_bag,
            })
        }))
    }

    /// Persist the "items actually being paid for" list before the
    /// redirect, so the return path can settle the right reservations.
    fn persist_pending_effect(
        env: &CheckoutEnvironment,
        items: Vec<ProductId>,
    ) -> Effect<CheckoutAction> {
        let store = Arc::clone(&env.store);
        let clock = Arc::clone(&env.clock);
        let holder = env.session().holder.clone();
        let policy = env.retry_policy.clone();
        let dead_letters = env.dead_letters.clone();

        Effect::Future(Box::pin(async move {
            let pending = PendingPayment {
                holder_id: holder.clone(),
                product_ids: items,
                created_at: clock.now(),
            };

            let outcome = retry_with_backoff(policy.clone(), || {
                let store = Arc::clone(&store);
                let pending = pending.clone();
                async move {
                    let payload = pending.encode()?;
                    store
                        .put(
                            collections::PENDING_PAYMENTS,
                            PendingPayment::storage_key(&pending.holder_id),
                            payload,
                        )
                        .await?;
                    Ok::<(), AvailabilityError>(())
                }
            })
            .await;

            if let Err(error) = outcome {
                dead_letters.push(
                    "persist pending payment list".to_string(),
                    error.to_string(),
                    policy.max_retries,
                );
            }

            None
        }))
    }

    /// Settle the reservations recorded in the pending-payment document:
    /// consume them on success, release them back to the bag on failure.
    fn settle_payment_return_effect(
        env: &CheckoutEnvironment,
        success: bool,
    ) -> Effect<CheckoutAction> {
        let store = Arc::clone(&env.store);
        let reservations = env.reservations.clone();
        let presence = env.presence.clone();
        let holder = env.session().holder.clone();
        let policy = env.retry_policy.clone();
        let dead_letters = env.dead_letters.clone();

        Effect::Future(Box::pin(async move {
            let key = holder.as_str().to_string();

            let outcome = retry_with_backoff(policy.clone(), || {
                let store = Arc::clone(&store);
                let reservations = reservations.clone();
                let presence = presence.clone();
                let key = key.clone();
                async move {
                    let Some(raw) = store.get(collections::PENDING_PAYMENTS, &key).await? else {
                        return Ok::<_, AvailabilityError>(Vec::new());
                    };
                    let pending: PendingPayment = raw.decode()?;

                    reservations.release(&pending.product_ids).await?;
                    if !success {
                        presence.set_present_batch(&pending.product_ids).await?;
                    }
                    store.delete(collections::PENDING_PAYMENTS, &key).await?;
                    Ok(pending.product_ids)
                }
            })
            .await;

            match outcome {
                Ok(products) => Some(CheckoutAction::CheckoutReleased {
                    products,
                    restored_to_bag: !success,
                }),
                Err(error) => {
                    dead_letters.push(
                        "settle returned payment".to_string(),
                        error.to_string(),
                        policy.max_retries,
                    );
                    Some(CheckoutAction::CheckoutReleased {
                        products: Vec::new(),
                        restored_to_bag: false,
                    })
                },
            }
        }))
    }

    fn countdown_effect(env: &CheckoutEnvironment, epoch: u64) -> Effect<CheckoutAction> {
        Effect::Delay {
            duration: env.config.reservation_ttl(),
            action: Box::new(CheckoutAction::CountdownExpired { epoch }),
        }
    }

    fn heartbeat_effect(env: &CheckoutEnvironment) -> Effect<CheckoutAction> {
        Effect::Delay {
            duration: env.config.heartbeat_interval(),
            action: Box::new(CheckoutAction::HeartbeatTick),
        }
    }

    fn grace_effect(env: &CheckoutEnvironment, epoch: u64) -> Effect<CheckoutAction> {
        Effect::Delay {
            duration: env.config.release_grace(),
            action: Box::new(CheckoutAction::GraceExpired { epoch }),
        }
    }

    /// Shared release path for abandon, grace timeout, and leave.
    fn release_and_idle(
        state: &mut CheckoutState,
        env: &CheckoutEnvironment,
        restore_to_bag: bool,
    ) -> Effects {
        let items = std::mem::take(&mut state.items);
        state.phase = CheckoutPhase::Idle;
        state.clear_timers();

        if items.is_empty() {
            return SmallVec::new();
        }
        smallvec![Self::release_effect(env, items, restore_to_bag)]
    }
}

impl Reducer for CheckoutReducer {
    type State = CheckoutState;
    type Action = CheckoutAction;
    type Environment = CheckoutEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per lifecycle transition
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects {
        match action {
            // ========== Entry ==========
            CheckoutAction::EnterCheckout {
                products,
                locked_now,
            } => {
                if state.phase != CheckoutPhase::Idle {
                    return SmallVec::new();
                }

                let locked: HashSet<ProductId> = locked_now.into_iter().collect();
                let mut seen = HashSet::new();
                let mut purchasable = Vec::new();
                let mut pre_rejected = Vec::new();
                for product in products {
                    if !seen.insert(product.clone()) {
                        continue;
                    }
                    if locked.contains(&product) {
                        pre_rejected.push((product, "held by another buyer".to_string()));
                    } else {
                        purchasable.push(product);
                    }
                }

                state.phase = CheckoutPhase::Reserving;
                state.redirected = false;
                state.rejected = Vec::new();
                let epoch = state.bump_epoch();
                state.deadline = Some(env.clock.now() + env.config.reservation_ttl_chrono());
                state.grace_deadline = None;

                smallvec![
                    Self::settle_effect(env, purchasable, pre_rejected),
                    Self::countdown_effect(env, epoch),
                    Self::heartbeat_effect(env),
                ]
            },

            // ========== Reservation outcome ==========
            CheckoutAction::ReservationSettled { granted, rejected } => {
                if state.phase != CheckoutPhase::Reserving {
                    // The buyer already left; anything we won must be handed
                    // back
                    if granted.is_empty() {
                        return SmallVec::new();
                    }
                    return smallvec![Self::release_effect(env, granted, true)];
                }

                state.rejected = rejected;
                if granted.is_empty() {
                    state.phase = CheckoutPhase::Idle;
                    state.clear_timers();
                    return SmallVec::new();
                }

                state.items = granted;
                state.phase = CheckoutPhase::Active;
                SmallVec::new()
            },

            // ========== Heartbeat ==========
            CheckoutAction::HeartbeatTick => {
                if state.phase != CheckoutPhase::Active {
                    // Chain stops; a later ConfirmContinue restarts it
                    return SmallVec::new();
                }

                // Reset the displayed countdown immediately; the extend is
                // issued alongside, not awaited
                let epoch = state.bump_epoch();
                state.deadline = Some(env.clock.now() + env.config.reservation_ttl_chrono());

                smallvec![
                    Self::extend_effect(env, state.items.clone()),
                    Self::countdown_effect(env, epoch),
                    Self::heartbeat_effect(env),
                ]
            },

            // ========== Countdown reached zero ==========
            CheckoutAction::CountdownExpired { epoch } => {
                if epoch != state.timer_epoch || state.phase != CheckoutPhase::Active {
                    return SmallVec::new();
                }

                state.phase = CheckoutPhase::Warning;
                state.deadline = None;
                let epoch = state.bump_epoch();
                state.grace_deadline = Some(env.clock.now() + env.config.release_grace_chrono());

                smallvec![Self::grace_effect(env, epoch)]
            },

            // ========== Buyer keeps going ==========
            CheckoutAction::ConfirmContinue => {
                if state.phase != CheckoutPhase::Warning {
                    return SmallVec::new();
                }

                state.phase = CheckoutPhase::Active;
                state.grace_deadline = None;
                let epoch = state.bump_epoch();
                state.deadline = Some(env.clock.now() + env.config.reservation_ttl_chrono());

                smallvec![
                    Self::extend_effect(env, state.items.clone()),
                    Self::countdown_effect(env, epoch),
                    Self::heartbeat_effect(env),
                ]
            },

            // ========== Buyer gives up ==========
            CheckoutAction::AbandonCheckout => {
                if !matches!(
                    state.phase,
                    CheckoutPhase::Active | CheckoutPhase::Warning
                ) {
                    return SmallVec::new();
                }
                Self::release_and_idle(state, env, true)
            },

            // ========== Grace window ran out ==========
            CheckoutAction::GraceExpired { epoch } => {
                if epoch != state.timer_epoch || state.phase != CheckoutPhase::Warning {
                    return SmallVec::new();
                }
                Self::release_and_idle(state, env, true)
            },

            // ========== Any exit except a successful redirect ==========
            CheckoutAction::LeaveCheckout => {
                if state.redirected {
                    // Reservations must survive the external payment flow
                    return SmallVec::new();
                }
                match state.phase {
                    CheckoutPhase::Idle => SmallVec::new(),
                    CheckoutPhase::Reserving => {
                        // Settle hasn't landed; the stale-settle arm above
                        // hands back whatever gets granted
                        state.phase = CheckoutPhase::Idle;
                        state.clear_timers();
                        SmallVec::new()
                    },
                    CheckoutPhase::Active
                    | CheckoutPhase::Warning
                    | CheckoutPhase::RedirectingToPayment => {
                        Self::release_and_idle(state, env, true)
                    },
                }
            },

            // ========== Hand-off to the payment provider ==========
            CheckoutAction::RedirectToPayment => {
                if state.phase != CheckoutPhase::Active {
                    return SmallVec::new();
                }

                state.phase = CheckoutPhase::RedirectingToPayment;
                state.redirected = true;
                state.clear_timers();

                smallvec![Self::persist_pending_effect(env, state.items.clone())]
            },

            // ========== Return from the payment provider ==========
            CheckoutAction::PaymentReturned { success } => {
                if !matches!(
                    state.phase,
                    CheckoutPhase::RedirectingToPayment | CheckoutPhase::Idle
                ) {
                    return SmallVec::new();
                }

                state.phase = CheckoutPhase::Idle;
                state.redirected = false;
                state.items = Vec::new();
                state.clear_timers();

                smallvec![Self::settle_payment_return_effect(env, success)]
            },

            // ========== Observational ==========
            CheckoutAction::CheckoutReleased { .. } => SmallVec::new(),
        }
    }
}
