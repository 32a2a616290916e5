//! Tidal Test - step-by-step assertions for reducers and their effects
//!
//! [`TestStore`] runs a reducer the same way a [`Store`](tidal_core::Store)
//! does, but instead of feeding effect output back in automatically it holds
//! every received action until the test claims it. Each step states the
//! expected state change, so a test reads as a transcript of the feature:
//!
//! ```
//! use tidal_core::{reducer, Effect};
//! use tidal_test::TestStore;
//!
//! #[derive(Debug, Clone, PartialEq, Default)]
//! struct Counter { count: i64 }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum Action { Increment, IncrementLater }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let counter = reducer::from_fn(|state: &mut Counter, action| match action {
//!     Action::Increment => {
//!         state.count += 1;
//!         Effect::none()
//!     }
//!     Action::IncrementLater => Effect::future(async { Action::Increment }),
//! });
//!
//! let mut store = TestStore::new(Counter::default(), counter);
//! store.send(Action::Increment, |state| state.count = 1);
//! store.send(Action::IncrementLater, |_| {});
//! store.receive(Action::Increment, |state| state.count = 2).await;
//! store.finish().await;
//! # }
//! ```
//!
//! Unclaimed actions and still-running effects fail the test in
//! [`finish`](TestStore::finish).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tidal_core::{CancellationRegistry, Effect, EffectRunner, Emitter, Reducer};
use tokio::sync::mpsc;

/// Default time [`TestStore::receive`] and [`TestStore::finish`] wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A store that makes every state change and received action explicit
pub struct TestStore<S, A> {
    state: S,
    reducer: Box<dyn Reducer<S, A>>,
    runner: EffectRunner,
    sink: Emitter<A>,
    rx: mpsc::UnboundedReceiver<A>,
    inbox: VecDeque<A>,
    timeout: Duration,
}

impl<S, A> TestStore<S, A>
where
    S: Clone + PartialEq + fmt::Debug,
    A: Clone + PartialEq + fmt::Debug + Send + 'static,
{
    /// Create a test store with its own cancellation registry
    ///
    /// Must be called inside a Tokio runtime if the reducer returns
    /// asynchronous effects.
    pub fn new(initial: S, reducer: impl Reducer<S, A> + 'static) -> Self {
        Self::with_registry(initial, reducer, Arc::new(CancellationRegistry::new()))
    }

    /// Create a test store that cancels through `registry`
    pub fn with_registry(
        initial: S,
        reducer: impl Reducer<S, A> + 'static,
        registry: Arc<CancellationRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: initial,
            reducer: Box::new(reducer),
            runner: EffectRunner::new(registry),
            sink: Emitter::new(move |action| tx.send(action).is_ok()),
            rx,
            inbox: VecDeque::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set how long `receive` and `finish` wait
    ///
    /// Under a paused Tokio clock this is virtual time, so it must be longer
    /// than any delay the effects under test sleep through.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the current state
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Get the cancellation registry effects run against
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        self.runner.registry()
    }

    /// Number of asynchronous effects still running
    pub fn in_flight(&self) -> usize {
        self.runner.in_flight()
    }

    /// Send an action and assert the resulting state
    ///
    /// `update` receives a copy of the state before the action and must
    /// mutate it into the expected state after the action.
    ///
    /// # Panics
    ///
    /// If received actions are still unclaimed, or the state after reducing
    /// differs from the expected state.
    #[track_caller]
    pub fn send(&mut self, action: A, update: impl FnOnce(&mut S)) {
        self.pump();
        if !self.inbox.is_empty() {
            panic!(
                "must handle {} received action(s) before sending {:?}: {:?}",
                self.inbox.len(),
                action,
                self.inbox
            );
        }
        self.step(action, update);
    }

    /// Wait for the next action from an effect and assert it and its state
    ///
    /// # Panics
    ///
    /// If no action arrives within the timeout, the received action differs
    /// from `expected`, or the resulting state differs from the expected
    /// state.
    pub async fn receive(&mut self, expected: A, update: impl FnOnce(&mut S)) {
        let Some(action) = self.next_received().await else {
            panic!(
                "expected to receive {:?}, but no action arrived within {:?}",
                expected, self.timeout
            );
        };
        assert_eq!(action, expected, "received an unexpected action");
        self.step(action, update);
    }

    /// Drop all actions received so far without reducing them
    ///
    /// Returns the number of actions dropped.
    pub fn skip_received(&mut self) -> usize {
        self.pump();
        let skipped = self.inbox.len();
        if skipped > 0 {
            tracing::debug!(skipped, "skipping received actions");
        }
        self.inbox.clear();
        skipped
    }

    /// Cancel every running cancellable effect
    pub fn cancel_all(&self) -> usize {
        self.runner.registry().cancel_all()
    }

    /// Assert that the test left nothing behind
    ///
    /// Waits up to the timeout for running effects to finish.
    ///
    /// # Panics
    ///
    /// If effects are still running after the timeout, or received actions
    /// were never claimed.
    pub async fn finish(mut self) {
        if tokio::time::timeout(self.timeout, self.runner.idle())
            .await
            .is_err()
        {
            panic!(
                "{} effect(s) still running after {:?}",
                self.runner.in_flight(),
                self.timeout
            );
        }
        self.pump();
        if !self.inbox.is_empty() {
            panic!(
                "{} received action(s) were never handled: {:?}",
                self.inbox.len(),
                self.inbox
            );
        }
    }

    #[track_caller]
    fn step(&mut self, action: A, update: impl FnOnce(&mut S)) {
        let mut expected = self.state.clone();
        update(&mut expected);

        let label = format!("{:?}", action);
        let effect = self.reducer.reduce(&mut self.state, action);
        assert_eq!(self.state, expected, "state mismatch after {}", label);

        self.start(effect);
    }

    #[track_caller]
    fn start(&self, effect: Effect<A>) {
        if let Err(e) = self.runner.run(effect, &self.sink) {
            panic!("effect failed to start: {}", e);
        }
    }

    async fn next_received(&mut self) -> Option<A> {
        self.pump();
        if let Some(action) = self.inbox.pop_front() {
            return Some(action);
        }
        tokio::time::timeout(self.timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    fn pump(&mut self) {
        while let Ok(action) = self.rx.try_recv() {
            self.inbox.push_back(action);
        }
    }
}

impl<S, A> Drop for TestStore<S, A> {
    fn drop(&mut self) {
        self.runner.registry().cancel_all();
    }
}

impl<S: fmt::Debug, A: fmt::Debug> fmt::Debug for TestStore<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestStore")
            .field("state", &self.state)
            .field("inbox", &self.inbox)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::reducer::from_fn;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Counter {
        count: i64,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Increment,
        Double,
        Echo,
        Tick,
        Stop,
    }

    fn counter() -> impl Reducer<Counter, Action> {
        from_fn(|state: &mut Counter, action| match action {
            Action::Increment => {
                state.count += 1;
                Effect::none()
            }
            Action::Double => Effect::merge([Effect::send(Action::Increment), Effect::send(Action::Increment)]),
            Action::Echo => Effect::future(async { Action::Increment }),
            Action::Tick => Effect::delayed(Action::Increment, Duration::from_secs(1)).cancellable("tick"),
            Action::Stop => Effect::cancel("tick"),
        })
    }

    #[tokio::test]
    async fn test_send_asserts_state() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Increment, |state| state.count = 1);
        store.send(Action::Increment, |state| state.count += 1);
        assert_eq!(store.state().count, 2);
        store.finish().await;
    }

    #[tokio::test]
    #[should_panic(expected = "state mismatch")]
    async fn test_send_wrong_state_panics() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Increment, |state| state.count = 5);
    }

    #[tokio::test]
    async fn test_receive_effect_actions() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Double, |_| {});
        store.receive(Action::Increment, |state| state.count = 1).await;
        store.receive(Action::Increment, |state| state.count = 2).await;

        store.send(Action::Echo, |_| {});
        store.receive(Action::Increment, |state| state.count = 3).await;
        store.finish().await;
    }

    #[tokio::test]
    #[should_panic(expected = "before sending")]
    async fn test_send_with_unhandled_actions_panics() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Double, |_| {});
        store.send(Action::Increment, |state| state.count = 1);
    }

    #[tokio::test]
    async fn test_skip_received() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Double, |_| {});
        assert_eq!(store.skip_received(), 2);
        assert_eq!(store.state().count, 0);
        store.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_effect_never_arrives() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Tick, |_| {});
        assert!(store.registry().contains(&tidal_core::CancelKey::new("tick")));

        store.send(Action::Stop, |_| {});
        store.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_action_received() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Tick, |_| {});
        store.receive(Action::Increment, |state| state.count = 1).await;
        store.finish().await;
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "no action arrived")]
    async fn test_receive_times_out() {
        let mut store = TestStore::new(Counter::default(), counter()).with_timeout(Duration::from_millis(10));
        store.receive(Action::Increment, |_| {}).await;
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "still running")]
    async fn test_finish_with_running_effect_panics() {
        let mut store = TestStore::new(Counter::default(), counter()).with_timeout(Duration::from_millis(10));
        store.send(Action::Tick, |_| {});
        store.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let mut store = TestStore::new(Counter::default(), counter());
        store.send(Action::Tick, |_| {});
        assert_eq!(store.cancel_all(), 1);
        store.finish().await;
    }
}
