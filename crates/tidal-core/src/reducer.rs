//! Reducers and reducer composition
//!
//! A reducer mutates the state it is handed and describes any follow-up work
//! as an [`Effect`]. Composition operators glue independent features into one
//! reducer:
//!
//! - [`combine`] runs several reducers over the same state and action
//! - [`pullback`] lifts a child reducer into a parent's state and action
//! - [`optional`] does the same for a child state that may be absent
//!
//! ```
//! use tidal_core::{case_path, reducer, Effect, Reducer};
//!
//! #[derive(Default)]
//! struct Counter { count: i64 }
//!
//! #[derive(Clone)]
//! enum CounterAction { Increment }
//!
//! #[derive(Default)]
//! struct App { counter: Counter }
//!
//! #[derive(Clone)]
//! enum AppAction { Counter(CounterAction), Quit }
//!
//! let counter = reducer::from_fn(|state: &mut Counter, action| match action {
//!     CounterAction::Increment => {
//!         state.count += 1;
//!         Effect::none()
//!     }
//! });
//! let app = reducer::pullback(counter, |app: &mut App| &mut app.counter, case_path!(AppAction::Counter));
//!
//! let mut state = App::default();
//! app.reduce(&mut state, AppAction::Counter(CounterAction::Increment));
//! app.reduce(&mut state, AppAction::Quit);
//! assert_eq!(state.counter.count, 1);
//! ```

use crate::effect::Effect;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A state transition rule over `(S, A)`
///
/// Implementations get exclusive access to the state for the duration of one
/// call and must not panic for actions in their own domain.
pub trait Reducer<S, A>: Send + Sync {
    fn reduce(&self, state: &mut S, action: A) -> Effect<A>;
}

impl<S, A, F> Reducer<S, A> for F
where
    F: Fn(&mut S, A) -> Effect<A> + Send + Sync,
{
    fn reduce(&self, state: &mut S, action: A) -> Effect<A> {
        self(state, action)
    }
}

/// Pin a closure's signature so it can be used as a reducer
///
/// Closures passed through a plain `impl Reducer` bound need explicit
/// argument types; this helper lets the compiler infer them.
pub fn from_fn<S, A, F>(f: F) -> F
where
    F: Fn(&mut S, A) -> Effect<A> + Send + Sync,
{
    f
}

// ============================================================================
// Combine
// ============================================================================

/// Runs every reducer in list order against the same state and action
///
/// Later reducers observe mutations made by earlier ones. Effects are merged.
pub struct Combine<S, A> {
    reducers: Vec<Box<dyn Reducer<S, A>>>,
}

/// Combine reducers that share a state and action type
pub fn combine<S, A>(reducers: Vec<Box<dyn Reducer<S, A>>>) -> Combine<S, A> {
    Combine { reducers }
}

impl<S, A> Combine<S, A> {
    /// Create an empty combination
    pub fn new() -> Self {
        Self {
            reducers: Vec::new(),
        }
    }

    /// Append a reducer
    pub fn with(mut self, reducer: impl Reducer<S, A> + 'static) -> Self {
        self.reducers.push(Box::new(reducer));
        self
    }

    /// Number of combined reducers
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Check if nothing was combined
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<S, A> Default for Combine<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> Reducer<S, A> for Combine<S, A>
where
    A: Clone + Send + 'static,
{
    fn reduce(&self, state: &mut S, action: A) -> Effect<A> {
        let mut effects = Vec::with_capacity(self.reducers.len());
        for reducer in &self.reducers {
            effects.push(reducer.reduce(state, action.clone()));
        }
        Effect::merge(effects)
    }
}

impl<S, A> fmt::Debug for Combine<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combine")
            .field("reducers", &self.reducers.len())
            .finish()
    }
}

// ============================================================================
// Case paths
// ============================================================================

/// Extract/embed pair between a parent action and one of its cases
///
/// `extract` yields `None` for parent actions outside the child's domain;
/// `embed` is its inverse. Use [`case_path!`](crate::case_path) for enum
/// variants.
pub struct CasePath<A, CA> {
    extract: Arc<dyn Fn(A) -> Option<CA> + Send + Sync>,
    embed: Arc<dyn Fn(CA) -> A + Send + Sync>,
}

impl<A, CA> CasePath<A, CA> {
    /// Create a case path from its two directions
    pub fn new(
        extract: impl Fn(A) -> Option<CA> + Send + Sync + 'static,
        embed: impl Fn(CA) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            extract: Arc::new(extract),
            embed: Arc::new(embed),
        }
    }

    /// Pull the child action out of a parent action
    pub fn extract(&self, action: A) -> Option<CA> {
        (self.extract)(action)
    }

    /// Wrap a child action into the parent action
    pub fn embed(&self, action: CA) -> A {
        (self.embed)(action)
    }

    pub(crate) fn embedder(&self) -> Arc<dyn Fn(CA) -> A + Send + Sync> {
        Arc::clone(&self.embed)
    }
}

impl<A, CA> Clone for CasePath<A, CA> {
    fn clone(&self) -> Self {
        Self {
            extract: Arc::clone(&self.extract),
            embed: Arc::clone(&self.embed),
        }
    }
}

impl<A, CA> fmt::Debug for CasePath<A, CA> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CasePath")
    }
}

/// Build a [`CasePath`] for a single-field tuple enum variant
///
/// ```
/// use tidal_core::case_path;
///
/// enum Action { Timer(u32), Quit }
///
/// let timer = case_path!(Action::Timer);
/// assert_eq!(timer.extract(Action::Timer(3)), Some(3));
/// assert_eq!(timer.extract(Action::Quit), None);
/// ```
#[macro_export]
macro_rules! case_path {
    ($($variant:ident)::+) => {
        $crate::reducer::CasePath::new(
            |action| match action {
                $($variant)::+(child) => ::core::option::Option::Some(child),
                #[allow(unreachable_patterns)]
                _ => ::core::option::Option::None,
            },
            $($variant)::+,
        )
    };
}

// ============================================================================
// Pullback
// ============================================================================

/// A child reducer lifted into a parent state and action
pub struct Pullback<R, L, CS, A, CA> {
    child: R,
    lens: L,
    case: CasePath<A, CA>,
    _state: PhantomData<fn() -> CS>,
}

/// Lift `child` into the parent's state and action
///
/// `lens` borrows the child slice out of the parent state; mutations made
/// through it are the write-back. Parent actions that `case` does not extract
/// never reach the child: the state is left untouched and no effect is
/// produced. Every action the child's effect emits is embedded back into the
/// parent action type.
pub fn pullback<R, L, S, CS, A, CA>(child: R, lens: L, case: CasePath<A, CA>) -> Pullback<R, L, CS, A, CA>
where
    R: Reducer<CS, CA>,
    L: Fn(&mut S) -> &mut CS + Send + Sync,
{
    Pullback {
        child,
        lens,
        case,
        _state: PhantomData,
    }
}

impl<R, L, S, CS, A, CA> Reducer<S, A> for Pullback<R, L, CS, A, CA>
where
    R: Reducer<CS, CA>,
    L: Fn(&mut S) -> &mut CS + Send + Sync,
    A: Send + 'static,
    CA: Send + 'static,
{
    fn reduce(&self, state: &mut S, action: A) -> Effect<A> {
        let Some(action) = self.case.extract(action) else {
            return Effect::None;
        };
        self.child
            .reduce((self.lens)(state), action)
            .map_with(self.case.embedder())
    }
}

impl<R, L, CS, A, CA> fmt::Debug for Pullback<R, L, CS, A, CA> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pullback")
            .field("child", &std::any::type_name::<R>())
            .finish_non_exhaustive()
    }
}

/// A child reducer lifted into a parent whose child state may be absent
pub struct Optional<R, L, CS, A, CA> {
    child: R,
    lens: L,
    case: CasePath<A, CA>,
    _state: PhantomData<fn() -> CS>,
}

/// Like [`pullback`], for a child state stored as an `Option`
///
/// A child action arriving while the child state is `None` is dropped and
/// logged; it usually means an effect outlived the feature that started it.
pub fn optional<R, L, S, CS, A, CA>(child: R, lens: L, case: CasePath<A, CA>) -> Optional<R, L, CS, A, CA>
where
    R: Reducer<CS, CA>,
    L: Fn(&mut S) -> Option<&mut CS> + Send + Sync,
{
    Optional {
        child,
        lens,
        case,
        _state: PhantomData,
    }
}

impl<R, L, S, CS, A, CA> Reducer<S, A> for Optional<R, L, CS, A, CA>
where
    R: Reducer<CS, CA>,
    L: Fn(&mut S) -> Option<&mut CS> + Send + Sync,
    A: Send + 'static,
    CA: Send + 'static,
{
    fn reduce(&self, state: &mut S, action: A) -> Effect<A> {
        let Some(action) = self.case.extract(action) else {
            return Effect::None;
        };
        let Some(child_state) = (self.lens)(state) else {
            tracing::warn!(
                child = std::any::type_name::<CS>(),
                "child action received while child state is absent"
            );
            return Effect::None;
        };
        self.child
            .reduce(child_state, action)
            .map_with(self.case.embedder())
    }
}

impl<R, L, CS, A, CA> fmt::Debug for Optional<R, L, CS, A, CA> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optional")
            .field("child", &std::any::type_name::<R>())
            .finish_non_exhaustive()
    }
}
