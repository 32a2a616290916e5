//! The store: owner of one state value and its dispatch loop
//!
//! ## Dispatch
//!
//! ```text
//! send(action)
//!  │
//!  ├── buffer.push_back(action)
//!  ├── already draining? ── yes ──> return (the active drain picks it up)
//!  │
//!  ├── drain: pop → reduce(&mut state) → collect effect → repeat
//!  │          Effect::Send is appended to the same buffer
//!  ├── notify subscribers once
//!  └── run collected effects; their actions re-enter send()
//! ```
//!
//! Only the draining caller writes the state, and it holds the write lock
//! only while a reducer runs.

use crate::config::StoreConfig;
use crate::effect::{Effect, Emitter};
use crate::error::{panic_message, Error, Result};
use crate::reducer::Reducer;
use crate::registry::CancellationRegistry;
use crate::runtime::EffectRunner;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Pending actions plus the flag marking an active drain
///
/// Both live under one lock so "buffer empty, stop draining" is atomic with
/// respect to concurrent enqueues.
struct Dispatch<A> {
    buffer: VecDeque<A>,
    draining: bool,
}

struct Inner<S, A> {
    config: StoreConfig,
    state: RwLock<S>,
    reducer: Box<dyn Reducer<S, A>>,
    dispatch: Mutex<Dispatch<A>>,
    runner: EffectRunner,
    revision: watch::Sender<u64>,
    owns_registry: bool,
}

impl<S, A> Drop for Inner<S, A> {
    fn drop(&mut self) {
        if self.owns_registry {
            let cancelled = self.runner.registry().cancel_all();
            if cancelled > 0 {
                tracing::debug!(store = %self.config.name(), cancelled, "store dropped, cancelled effects");
            }
        }
    }
}

/// Runtime owning one state value and one reducer
///
/// Cloning a store yields another handle to the same state.
pub struct Store<S, A> {
    inner: Arc<Inner<S, A>>,
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Step-by-step construction of a [`Store`]
pub struct StoreBuilder<S, A> {
    state: S,
    reducer: Box<dyn Reducer<S, A>>,
    config: StoreConfig,
    registry: Option<Arc<CancellationRegistry>>,
    handle: Option<Handle>,
}

impl<S, A> StoreBuilder<S, A>
where
    S: Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    /// Use a specific configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing cancellation registry instead of owning one
    ///
    /// A shared registry is not cleared when the store is dropped.
    pub fn registry(mut self, registry: Arc<CancellationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run effects on a specific Tokio runtime
    ///
    /// Defaults to the runtime current at `build` time.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Create the store
    pub fn build(self) -> Store<S, A> {
        let owns_registry = self.registry.is_none();
        let registry = self.registry.unwrap_or_default();
        let mut runner = EffectRunner::new(registry);
        if let Some(handle) = self.handle {
            runner = runner.with_handle(handle);
        }
        let (revision, _) = watch::channel(0);

        tracing::debug!(store = %self.config.name(), owns_registry, "store created");
        Store {
            inner: Arc::new(Inner {
                config: self.config,
                state: RwLock::new(self.state),
                reducer: self.reducer,
                dispatch: Mutex::new(Dispatch {
                    buffer: VecDeque::new(),
                    draining: false,
                }),
                runner,
                revision,
                owns_registry,
            }),
        }
    }
}

impl<S, A> Store<S, A>
where
    S: Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
{
    /// Create a store with the default configuration
    ///
    /// Effects run on the Tokio runtime current at this call.
    pub fn new(initial: S, reducer: impl Reducer<S, A> + 'static) -> Self {
        Self::builder(initial, reducer).build()
    }

    /// Create a store with a specific configuration
    pub fn with_config(initial: S, reducer: impl Reducer<S, A> + 'static, config: StoreConfig) -> Self {
        Self::builder(initial, reducer).config(config).build()
    }

    /// Start building a store
    pub fn builder(initial: S, reducer: impl Reducer<S, A> + 'static) -> StoreBuilder<S, A> {
        StoreBuilder {
            state: initial,
            reducer: Box::new(reducer),
            config: StoreConfig::default(),
            registry: None,
            handle: None,
        }
    }

    /// Dispatch an action
    ///
    /// If a drain is already running (a reentrant call from an effect,
    /// a subscriber, or another thread), the action is queued for that drain
    /// and this returns immediately. Otherwise this call drains the buffer,
    /// notifies subscribers once, and starts the collected effects.
    ///
    /// A reducer panic aborts the drain: the remaining buffered actions are
    /// dropped and the panic is returned as [`Error::ReducerPanicked`].
    /// Effects of the actions reduced before the panic still run.
    pub fn send(&self, action: A) -> Result<()> {
        {
            let mut dispatch = self.inner.dispatch.lock();
            dispatch.buffer.push_back(action);
            if dispatch.draining {
                return Ok(());
            }
            dispatch.draining = true;
        }

        let _span = tracing::debug_span!("drain", store = %self.inner.config.name()).entered();
        let mut effects = Vec::new();
        let drained = self.drain(&mut effects);
        self.inner.revision.send_modify(|revision| *revision += 1);

        let started = self.run_effects(effects);
        drained?;
        started
    }

    /// Reduce buffered actions until empty, collecting their effects into `effects`
    ///
    /// On failure `effects` keeps everything collected before the failing action.
    fn drain(&self, effects: &mut Vec<Effect<A>>) -> Result<()> {
        let limit = self.inner.config.max_actions_per_drain();
        let mut reduced = 0usize;

        loop {
            let action = {
                let mut dispatch = self.inner.dispatch.lock();
                match dispatch.buffer.pop_front() {
                    Some(action) => action,
                    None => {
                        dispatch.draining = false;
                        break;
                    }
                }
            };

            if reduced == limit {
                self.abort_drain();
                tracing::error!(limit, "drain limit exceeded");
                return Err(Error::DrainLimitExceeded { limit });
            }
            reduced += 1;

            let effect = self.reduce(action)?;
            self.collect(effect, effects);
        }

        tracing::debug!(actions = reduced, effects = effects.len(), "drained");
        Ok(())
    }

    fn reduce(&self, action: A) -> Result<Effect<A>> {
        tracing::trace!(?action, "reduce");

        let outcome = {
            let mut state = self.inner.state.write();
            std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.inner.reducer.reduce(&mut state, action)
            }))
        };

        outcome.map_err(|payload| {
            self.abort_drain();
            let message = panic_message(payload.as_ref());
            tracing::error!(message = %message, "reducer panicked");
            Error::ReducerPanicked {
                action_type: std::any::type_name::<A>().to_string(),
                message,
            }
        })
    }

    /// Split synchronous sends into the buffer, keep everything else for later
    ///
    /// Sends under a cancellable wrapper are immediate too, so they join the
    /// buffer and only the asynchronous remainder keeps the key.
    fn collect(&self, effect: Effect<A>, out: &mut Vec<Effect<A>>) {
        match effect {
            Effect::None => {}
            Effect::Send(action) => self.inner.dispatch.lock().buffer.push_back(action),
            Effect::Merge(effects) => {
                for effect in effects {
                    self.collect(effect, out);
                }
            }
            Effect::Cancellable { key, effect } => {
                let mut rest = Vec::new();
                self.collect(*effect, &mut rest);
                if !rest.is_empty() {
                    out.push(Effect::Cancellable {
                        key,
                        effect: Box::new(Effect::merge(rest)),
                    });
                }
            }
            other => out.push(other),
        }
    }

    fn abort_drain(&self) {
        let mut dispatch = self.inner.dispatch.lock();
        let dropped = dispatch.buffer.len();
        dispatch.buffer.clear();
        dispatch.draining = false;
        if dropped > 0 {
            tracing::warn!(dropped, "discarded buffered actions of failed drain");
        }
    }

    fn run_effects(&self, effects: Vec<Effect<A>>) -> Result<()> {
        if effects.is_empty() {
            return Ok(());
        }

        let sink = self.sink();
        let mut first_error = None;
        for effect in effects {
            if let Err(e) = self.inner.runner.run(effect, &sink) {
                tracing::error!(error = %e, "failed to start effect");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Emitter feeding effect output back into this store
    ///
    /// Holds the store weakly so long-lived effects don't keep it alive.
    fn sink(&self) -> Emitter<A> {
        let inner: Weak<Inner<S, A>> = Arc::downgrade(&self.inner);
        Emitter::new(move |action| {
            let Some(inner) = inner.upgrade() else {
                return false;
            };
            if let Err(e) = (Store { inner }).send(action) {
                tracing::error!(error = %e, "action from effect failed");
            }
            true
        })
    }

    /// Read the current state
    ///
    /// Holds a read lock while `f` runs; calling `send` from `f` deadlocks.
    pub fn state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Clone the current state
    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.inner.state.read().clone()
    }

    /// Watch for state changes
    ///
    /// The value is a revision counter bumped once per outer `send`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Number of completed outer `send` calls
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Number of running asynchronous effects
    pub fn in_flight(&self) -> usize {
        self.inner.runner.in_flight()
    }

    /// Wait until no effect is running and no drain is in progress
    pub async fn settled(&self) {
        loop {
            self.inner.runner.idle().await;
            if !self.inner.dispatch.lock().draining && self.inner.runner.in_flight() == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Get the store's cancellation registry
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        self.inner.runner.registry()
    }

    /// Get the store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Derive a child store over a slice of this store's state
    ///
    /// The child reads through `project` and sends through `embed`; this
    /// store remains the sole owner of the state.
    pub fn scope<CS, CA>(
        &self,
        project: impl Fn(&S) -> &CS + Send + Sync + 'static,
        embed: impl Fn(CA) -> A + Send + Sync + 'static,
    ) -> ScopedStore<S, A, CS, CA> {
        ScopedStore {
            parent: self.clone(),
            project: Arc::new(project),
            embed: Arc::new(embed),
        }
    }
}

impl<S, A> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.config.name())
            .field("revision", &*self.inner.revision.borrow())
            .field("runner", &self.inner.runner)
            .finish()
    }
}

// ============================================================================
// Scoped stores
// ============================================================================

type Project<S, CS> = Arc<dyn Fn(&S) -> &CS + Send + Sync>;
type Embed<CA, A> = Arc<dyn Fn(CA) -> A + Send + Sync>;

/// Pin a projection closure's signature to a borrowing one
fn projection<S, CS, F>(f: F) -> F
where
    F: Fn(&S) -> &CS,
{
    f
}

/// A child view of a [`Store`]
///
/// Reads a projection of the parent state and sends child actions embedded
/// into the parent action type.
pub struct ScopedStore<S, A, CS, CA> {
    parent: Store<S, A>,
    project: Project<S, CS>,
    embed: Embed<CA, A>,
}

impl<S, A, CS, CA> Clone for ScopedStore<S, A, CS, CA> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            project: Arc::clone(&self.project),
            embed: Arc::clone(&self.embed),
        }
    }
}

impl<S, A, CS, CA> ScopedStore<S, A, CS, CA>
where
    S: Send + Sync + 'static,
    A: fmt::Debug + Send + 'static,
    CS: 'static,
    CA: 'static,
{
    /// Send a child action through the parent store
    pub fn send(&self, action: CA) -> Result<()> {
        self.parent.send((self.embed)(action))
    }

    /// Read the projected child state
    pub fn state<R>(&self, f: impl FnOnce(&CS) -> R) -> R {
        self.parent.state(|state| f((self.project)(state)))
    }

    /// Clone the projected child state
    pub fn snapshot(&self) -> CS
    where
        CS: Clone,
    {
        self.state(CS::clone)
    }

    /// Watch for changes of the parent state
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.parent.subscribe()
    }

    /// Get the parent store
    pub fn parent(&self) -> &Store<S, A> {
        &self.parent
    }

    /// Scope further into the child state
    pub fn scope<GS, GA>(
        &self,
        project: impl Fn(&CS) -> &GS + Send + Sync + 'static,
        embed: impl Fn(GA) -> CA + Send + Sync + 'static,
    ) -> ScopedStore<S, A, GS, GA> {
        let outer_project = Arc::clone(&self.project);
        let outer_embed = Arc::clone(&self.embed);

        ScopedStore {
            parent: self.parent.clone(),
            project: Arc::new(projection(move |state: &S| project(outer_project(state)))),
            embed: Arc::new(move |action: GA| outer_embed(embed(action))),
        }
    }
}

impl<S, A, CS, CA> fmt::Debug for ScopedStore<S, A, CS, CA> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedStore")
            .field("parent", &self.parent)
            .field("child", &std::any::type_name::<CS>())
            .finish()
    }
}
