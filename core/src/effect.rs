//! Side-effect descriptions returned by reducers.
//!
//! Effects are NOT executed when a reducer returns them. They are values
//! describing what should happen (delays, async store work), and the
//! runtime crate's `Store` executes them, feeding any produced actions back
//! into the reducer. This keeps reducers pure and the whole checkout state
//! machine testable without timers or I/O.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A side effect to be executed by the runtime.
///
/// # Type Parameters
///
/// - `Action`: the action type effects can produce (feedback loop)
///
/// # Delayed Actions and Timer Epochs
///
/// There is deliberately no "cancel timer" primitive. A pending
/// [`Effect::Delay`] always fires; reducers that reset or supersede timers
/// stamp the delayed action with an epoch and ignore stale deliveries. This
/// keeps every timer owned by the runtime's effect tasks, which all end with
/// the store itself.
pub enum Effect<Action> {
    /// No-op effect.
    None,

    /// Run effects concurrently.
    Parallel(Vec<Effect<Action>>),

    /// Run effects in order, waiting for each to complete.
    Sequential(Vec<Effect<Action>>),

    /// Dispatch an action after a delay (countdowns, heartbeats, grace
    /// timers).
    Delay {
        /// How long to wait.
        duration: Duration,
        /// Action to dispatch after the delay.
        action: Box<Action>,
    },

    /// Arbitrary async computation.
    ///
    /// Returns `Option<Action>`. If `Some`, the action is fed back into the
    /// reducer.
    Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
}

// Manual Debug implementation since Future doesn't implement Debug
impl<Action> std::fmt::Debug for Effect<Action>
where
    Action: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Delay { duration, action } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("action", action)
                .finish(),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
        }
    }
}

impl<Action> Effect<Action> {
    /// Combine effects to run in parallel.
    #[must_use]
    pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially.
    #[must_use]
    pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Sequential(effects)
    }
}
