//! The Reducer trait, the core abstraction for business logic.
//!
//! Reducers are pure functions: `(State, Action, Environment) → Effects`.
//! They validate the action, update state in place, and return effect
//! descriptions for the runtime to execute. All time, identity, and store
//! access arrives through the Environment, never through ambient globals.

use crate::effect::Effect;
use smallvec::SmallVec;

/// The Reducer trait.
///
/// # Type Parameters
///
/// - `State`: the domain state this reducer operates on
/// - `Action`: the action type this reducer processes
/// - `Environment`: the injected dependencies this reducer needs
///
/// # Example
///
/// ```ignore
/// impl Reducer for CheckoutReducer {
///     type State = CheckoutState;
///     type Action = CheckoutAction;
///     type Environment = CheckoutEnvironment;
///
///     fn reduce(
///         &self,
///         state: &mut CheckoutState,
///         action: CheckoutAction,
///         env: &CheckoutEnvironment,
///     ) -> SmallVec<[Effect<CheckoutAction>; 4]> {
///         match action {
///             CheckoutAction::AbandonCheckout => {
///                 // Business logic here
///                 smallvec![]
///             }
///             _ => smallvec![],
///         }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on.
    type State;

    /// The action type this reducer processes.
    type Action;

    /// The environment type with injected dependencies.
    type Environment;

    /// Reduce an action into state changes and effects.
    ///
    /// This is a pure function that:
    /// 1. Validates the action
    /// 2. Updates state in place
    /// 3. Returns effect descriptions to be executed
    ///
    /// Most actions produce zero or a handful of effects, so the return type
    /// is a `SmallVec` that stays on the stack for the common case.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]>;
}
