//! Effect execution
//!
//! [`EffectRunner`] turns an [`Effect`] into running work. Publishers are
//! spawned onto a Tokio runtime; cancellable ones race against every task they
//! are bound to, so the first cancellation wins and nothing they emit
//! afterwards reaches the sink.
//!
//! The runner knows nothing about stores. Actions go to whatever [`Emitter`]
//! the caller supplies, which lets the store and the test harness share it.

use crate::effect::{Effect, Emitter, Publisher};
use crate::error::{panic_message, Error, Result};
use crate::key::CancelKey;
use crate::registry::CancellationRegistry;
use crate::task::Task;
use futures::future::select_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Executes effects against a cancellation registry
#[derive(Clone)]
pub struct EffectRunner {
    registry: Arc<CancellationRegistry>,
    handle: Option<Handle>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl EffectRunner {
    /// Create a runner on the current Tokio runtime, if there is one
    pub fn new(registry: Arc<CancellationRegistry>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            registry,
            handle: Handle::try_current().ok(),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Spawn publishers onto a specific runtime
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Get the registry this runner cancels through
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// Number of publishers currently running
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Watch the number of running publishers
    pub fn watch_in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    /// Wait until no publisher is running
    pub async fn idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Execute `effect`, delivering every produced action to `sink`
    ///
    /// Immediate sends are delivered before this returns; publishers deliver
    /// from their own Tokio task. Every member of a merge is started even if
    /// an earlier one fails to start; the first such error is returned.
    pub fn run<A: Send + 'static>(&self, effect: Effect<A>, sink: &Emitter<A>) -> Result<()> {
        self.execute(effect, sink, &[])
    }

    fn execute<A: Send + 'static>(
        &self,
        effect: Effect<A>,
        sink: &Emitter<A>,
        keys: &[CancelKey],
    ) -> Result<()> {
        match effect {
            Effect::None => Ok(()),
            Effect::Send(action) => {
                sink.emit(action);
                Ok(())
            }
            Effect::Publisher(publisher) => self.spawn(publisher, sink, keys),
            Effect::Merge(effects) => {
                let mut first_error = None;
                for effect in effects {
                    if let Err(e) = self.execute(effect, sink, keys) {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Effect::Cancellable { key, effect } => {
                let mut keys = keys.to_vec();
                keys.push(key);
                self.execute(*effect, sink, &keys)
            }
            Effect::Cancel(key) => {
                self.registry.cancel(&key);
                Ok(())
            }
        }
    }

    fn spawn<A: Send + 'static>(
        &self,
        publisher: Publisher<A>,
        sink: &Emitter<A>,
        keys: &[CancelKey],
    ) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(Error::NoRuntime)?;

        let guard = RunGuard::enter(self, keys);
        let gate: Vec<Task> = guard.tasks.iter().map(|(_, task)| task.clone()).collect();

        let emitter = {
            let sink = sink.clone();
            let gate = gate.clone();
            Emitter::new(move |action| {
                if gate.iter().any(Task::is_cancelled) {
                    return false;
                }
                sink.emit(action)
            })
        };
        let (produce, recover) = publisher.start(emitter.clone());

        handle.spawn(async move {
            let _guard = guard;
            let produce = AssertUnwindSafe(produce).catch_unwind();

            let outcome = tokio::select! {
                biased;
                _ = any_cancelled(&gate) => None,
                outcome = produce => Some(outcome),
            };

            let error = match outcome {
                None => {
                    tracing::trace!("publisher cancelled");
                    return;
                }
                Some(Ok(Ok(()))) => return,
                Some(Ok(Err(error))) => error,
                Some(Err(payload)) => {
                    anyhow::anyhow!("publisher panicked: {}", panic_message(payload.as_ref()))
                }
            };

            match recover {
                Some(recover) => {
                    tracing::debug!(error = %error, "publisher failed, sending failure action");
                    emitter.emit(recover(error));
                }
                None => tracing::warn!(error = %error, "publisher failed"),
            }
        });

        Ok(())
    }
}

impl std::fmt::Debug for EffectRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRunner")
            .field("in_flight", &self.in_flight())
            .field("tasks", &self.registry.len())
            .finish()
    }
}

/// Holds a running publisher's registry joins and in-flight count
///
/// Dropped when the publisher finishes, is cancelled, or its Tokio task is
/// torn down with the runtime.
struct RunGuard {
    registry: Arc<CancellationRegistry>,
    in_flight: Arc<watch::Sender<usize>>,
    tasks: Vec<(CancelKey, Task)>,
}

impl RunGuard {
    fn enter(runner: &EffectRunner, keys: &[CancelKey]) -> Self {
        let tasks = keys
            .iter()
            .map(|key| (key.clone(), runner.registry.acquire(key)))
            .collect();
        runner.in_flight.send_modify(|count| *count += 1);

        Self {
            registry: Arc::clone(&runner.registry),
            in_flight: Arc::clone(&runner.in_flight),
            tasks,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        for (key, task) in &self.tasks {
            self.registry.release(key, task.id());
        }
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Resolves when any of `tasks` is cancelled; never for an empty slice
async fn any_cancelled(tasks: &[Task]) {
    if tasks.is_empty() {
        return std::future::pending().await;
    }
    select_all(tasks.iter().map(|task| Box::pin(task.cancelled()))).await;
}
