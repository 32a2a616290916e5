//! Effects produced by reducers
//!
//! An [`Effect`] is a description of future work, not the work itself. The
//! store (or a test harness) hands it to the [`EffectRunner`](crate::EffectRunner)
//! after the reducer returns.

use crate::key::CancelKey;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Callback a publisher emits actions through
///
/// `emit` returns `false` once nothing will receive further actions (the
/// effect was cancelled or its store is gone). Producers that poll it can stop
/// early; those that don't are simply ignored.
pub struct Emitter<A> {
    sink: Arc<dyn Fn(A) -> bool + Send + Sync>,
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<A: 'static> Emitter<A> {
    /// Create an emitter from a sink function
    pub fn new(sink: impl Fn(A) -> bool + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Emit one action
    pub fn emit(&self, action: A) -> bool {
        (self.sink)(action)
    }

    /// Build an emitter for another action type that converts into this one
    pub fn contramap<B: 'static>(self, f: Arc<dyn Fn(B) -> A + Send + Sync>) -> Emitter<B> {
        Emitter::new(move |action| self.emit(f(action)))
    }
}

impl<A> fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Emitter")
    }
}

type Produce<A> = Box<dyn FnOnce(Emitter<A>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Converts a producer failure into a failure action
pub type Recover<A> = Arc<dyn Fn(anyhow::Error) -> A + Send + Sync>;

/// An asynchronous procedure emitting zero or more actions
pub struct Publisher<A> {
    produce: Produce<A>,
    recover: Option<Recover<A>>,
}

impl<A: Send + 'static> Publisher<A> {
    /// Create a publisher from an async producer
    pub fn new<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            produce: Box::new(move |emitter| produce(emitter).boxed()),
            recover: None,
        }
    }

    /// Start the producer, returning its future and the failure mapping
    pub(crate) fn start(
        self,
        emitter: Emitter<A>,
    ) -> (BoxFuture<'static, anyhow::Result<()>>, Option<Recover<A>>) {
        ((self.produce)(emitter), self.recover)
    }

    fn map<B: Send + 'static>(self, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> Publisher<B> {
        let Publisher { produce, recover } = self;
        let recover = recover.map(|recover| {
            let f = Arc::clone(&f);
            Arc::new(move |error: anyhow::Error| f(recover(error))) as Recover<B>
        });

        Publisher {
            produce: Box::new(move |emitter: Emitter<B>| produce(emitter.contramap(f))),
            recover,
        }
    }
}

impl<A> fmt::Debug for Publisher<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("recovers", &self.recover.is_some())
            .finish_non_exhaustive()
    }
}

/// Description of future work returned by a reducer
pub enum Effect<A> {
    /// Produces nothing
    None,

    /// Yields exactly one action, synchronously
    Send(A),

    /// Asynchronous producer of zero or more actions
    Publisher(Publisher<A>),

    /// Runs every member effect independently
    Merge(Vec<Effect<A>>),

    /// Binds an effect to a cancellation key
    Cancellable {
        key: CancelKey,
        effect: Box<Effect<A>>,
    },

    /// Cancels whatever runs under the key
    Cancel(CancelKey),
}

impl<A: Send + 'static> Effect<A> {
    /// An effect that does nothing
    pub fn none() -> Self {
        Effect::None
    }

    /// Send one action back into the store
    pub fn send(action: A) -> Self {
        Effect::Send(action)
    }

    /// Run several effects concurrently
    pub fn merge(effects: impl IntoIterator<Item = Effect<A>>) -> Self {
        // Flatten nested merges and filter out None
        let mut flattened: Vec<Effect<A>> = effects
            .into_iter()
            .flat_map(|effect| match effect {
                Effect::None => Vec::new(),
                Effect::Merge(inner) => inner,
                other => vec![other],
            })
            .collect();

        match flattened.len() {
            0 => Effect::None,
            1 => flattened.pop().unwrap_or(Effect::None),
            _ => Effect::Merge(flattened),
        }
    }

    /// Run an async producer that emits actions through an [`Emitter`]
    pub fn publisher<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Effect::Publisher(Publisher::new(produce))
    }

    /// Alias of [`Effect::publisher`]
    pub fn run<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(Emitter<A>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::publisher(produce)
    }

    /// Run a future and send its output
    pub fn future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = A> + Send + 'static,
    {
        Self::publisher(move |emitter| async move {
            emitter.emit(fut.await);
            Ok(())
        })
    }

    /// Run a fallible future and send its output
    ///
    /// Errors follow the usual publisher failure path, see [`Effect::catch`].
    pub fn try_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<A>> + Send + 'static,
    {
        Self::publisher(move |emitter| async move {
            emitter.emit(fut.await?);
            Ok(())
        })
    }

    /// Run a future for its side effects only
    pub fn fire_and_forget<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::publisher(move |_| async move {
            fut.await;
            Ok(())
        })
    }

    /// Send every item of a stream, stopping once nobody listens
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = A> + Send + 'static,
    {
        Self::publisher(move |emitter| async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(action) = stream.next().await {
                if !emitter.emit(action) {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Send `action` after `delay`
    pub fn delayed(action: A, delay: Duration) -> Self {
        Self::publisher(move |emitter| async move {
            tokio::time::sleep(delay).await;
            emitter.emit(action);
            Ok(())
        })
    }

    /// Cancel every effect running under `key`
    pub fn cancel<K>(key: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        Effect::Cancel(CancelKey::new(key))
    }

    /// Make this effect cancellable under `key`
    ///
    /// If another effect is already running under `key`, both share one
    /// cancellation flag.
    pub fn cancellable<K>(self, key: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Effect::None => Effect::None,
            effect => Effect::Cancellable {
                key: CancelKey::new(key),
                effect: Box::new(effect),
            },
        }
    }

    /// Make this effect cancellable under `key`, cancelling whatever already
    /// runs under it first
    pub fn cancellable_in_flight<K>(self, key: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        let key = CancelKey::new(key);
        Effect::merge(vec![Effect::Cancel(key.clone()), self.cancellable(key)])
    }

    /// Turn publisher failures into an action instead of dropping them
    ///
    /// Applies to every publisher inside this effect.
    pub fn catch(self, recover: impl Fn(anyhow::Error) -> A + Send + Sync + 'static) -> Self {
        self.catch_with(Arc::new(recover))
    }

    fn catch_with(self, recover: Recover<A>) -> Self {
        match self {
            Effect::Publisher(mut publisher) => {
                publisher.recover = Some(recover);
                Effect::Publisher(publisher)
            }
            Effect::Merge(effects) => Effect::Merge(
                effects
                    .into_iter()
                    .map(|effect| effect.catch_with(Arc::clone(&recover)))
                    .collect(),
            ),
            Effect::Cancellable { key, effect } => Effect::Cancellable {
                key,
                effect: Box::new(effect.catch_with(recover)),
            },
            other => other,
        }
    }

    /// Lift this effect into another action type
    pub fn map<B: Send + 'static>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<B> {
        self.map_with(Arc::new(f))
    }

    pub(crate) fn map_with<B: Send + 'static>(self, f: Arc<dyn Fn(A) -> B + Send + Sync>) -> Effect<B> {
        match self {
            Effect::None => Effect::None,
            Effect::Send(action) => Effect::Send(f(action)),
            Effect::Publisher(publisher) => Effect::Publisher(publisher.map(f)),
            Effect::Merge(effects) => Effect::Merge(
                effects
                    .into_iter()
                    .map(|effect| effect.map_with(Arc::clone(&f)))
                    .collect(),
            ),
            Effect::Cancellable { key, effect } => Effect::Cancellable {
                key,
                effect: Box::new(effect.map_with(f)),
            },
            Effect::Cancel(key) => Effect::Cancel(key),
        }
    }

    /// Check if this is a None effect
    pub fn is_none(&self) -> bool {
        matches!(self, Effect::None)
    }
}

impl<A> Default for Effect<A> {
    fn default() -> Self {
        Effect::None
    }
}

impl<A: fmt::Debug> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::None => f.write_str("None"),
            Effect::Send(action) => f.debug_tuple("Send").field(action).finish(),
            Effect::Publisher(publisher) => publisher.fmt(f),
            Effect::Merge(effects) => f.debug_tuple("Merge").field(effects).finish(),
            Effect::Cancellable { key, effect } => f
                .debug_struct("Cancellable")
                .field("key", key)
                .field("effect", effect)
                .finish(),
            Effect::Cancel(key) => f.debug_tuple("Cancel").field(key).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Child {
        Tick,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Parent {
        Child(Child),
    }

    #[test]
    fn test_merge_flattens() {
        let effect: Effect<u8> = Effect::merge(vec![
            Effect::none(),
            Effect::merge(vec![Effect::send(1), Effect::send(2)]),
            Effect::send(3),
        ]);

        if let Effect::Merge(effects) = effect {
            assert_eq!(effects.len(), 3);
        } else {
            panic!("Expected Merge");
        }
    }

    #[test]
    fn test_merge_single_unwraps() {
        let effect: Effect<u8> = Effect::merge(vec![Effect::none(), Effect::send(9)]);
        assert!(matches!(effect, Effect::Send(9)));

        let effect: Effect<u8> = Effect::merge(Vec::new());
        assert!(effect.is_none());
    }

    #[test]
    fn test_cancellable_none_stays_none() {
        let effect: Effect<u8> = Effect::none().cancellable("key");
        assert!(effect.is_none());
    }

    #[test]
    fn test_cancellable_in_flight_cancels_first() {
        let effect: Effect<u8> = Effect::send(1).cancellable_in_flight("search");

        let Effect::Merge(effects) = effect else {
            panic!("Expected Merge");
        };
        assert!(matches!(&effects[0], Effect::Cancel(key) if *key == CancelKey::new("search")));
        assert!(matches!(&effects[1], Effect::Cancellable { .. }));
    }

    #[test]
    fn test_map_lifts_sends() {
        let effect = Effect::merge(vec![
            Effect::send(Child::Tick),
            Effect::send(Child::Tick).cancellable("timer"),
        ])
        .map(Parent::Child);

        let Effect::Merge(effects) = effect else {
            panic!("Expected Merge");
        };
        assert!(matches!(effects[0], Effect::Send(Parent::Child(Child::Tick))));
        let Effect::Cancellable { effect, .. } = &effects[1] else {
            panic!("Expected Cancellable");
        };
        assert!(matches!(**effect, Effect::Send(Parent::Child(Child::Tick))));
    }

    #[tokio::test]
    async fn test_mapped_publisher_emits_parent_actions() {
        let effect = Effect::future(async { Child::Tick }).map(Parent::Child);
        let Effect::Publisher(publisher) = effect else {
            panic!("Expected Publisher");
        };

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (fut, _) = publisher.start(Emitter::new(move |action| {
            sink.lock().push(action);
            true
        }));
        fut.await.unwrap();

        assert_eq!(*seen.lock(), vec![Parent::Child(Child::Tick)]);
    }

    #[test]
    fn test_catch_reaches_nested_publishers() {
        let effect: Effect<String> = Effect::merge(vec![
            Effect::try_future(async { Err(anyhow::anyhow!("boom")) }),
            Effect::try_future(async { Ok(String::from("ok")) }).cancellable("k"),
        ])
        .catch(|error| error.to_string());

        let Effect::Merge(effects) = effect else {
            panic!("Expected Merge");
        };
        assert!(matches!(&effects[0], Effect::Publisher(p) if p.recover.is_some()));
        let Effect::Cancellable { effect, .. } = &effects[1] else {
            panic!("Expected Cancellable");
        };
        assert!(matches!(&**effect, Effect::Publisher(p) if p.recover.is_some()));
    }

    #[test]
    fn test_debug_format() {
        let effect: Effect<u8> = Effect::send(1).cancellable("k");
        assert_eq!(
            format!("{:?}", effect),
            "Cancellable { key: \"k\", effect: Send(1) }"
        );
    }
}
