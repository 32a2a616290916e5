//! End-to-end behavior of stores built from composed reducers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tidal_core::reducer::{from_fn, pullback};
use tidal_core::{case_path, CancelKey, Combine, Effect, Reducer, Store};

#[derive(Debug, Clone, PartialEq, Default)]
struct Counter {
    count: i64,
}

#[derive(Debug, Clone, PartialEq)]
enum CounterAction {
    Increment,
    Decrement,
    IncrementTwice,
}

fn counter() -> impl Reducer<Counter, CounterAction> {
    from_fn(|state: &mut Counter, action| match action {
        CounterAction::Increment => {
            state.count += 1;
            Effect::none()
        }
        CounterAction::Decrement => {
            state.count -= 1;
            Effect::none()
        }
        CounterAction::IncrementTwice => Effect::merge([
            Effect::send(CounterAction::Increment),
            Effect::send(CounterAction::Increment),
        ]),
    })
}

#[tokio::test]
async fn test_counter_store() {
    let store = Store::new(Counter::default(), counter());

    store.send(CounterAction::Increment).unwrap();
    store.send(CounterAction::Increment).unwrap();
    store.send(CounterAction::Decrement).unwrap();

    assert_eq!(store.state(|s| s.count), 1);
    assert_eq!(store.revision(), 3);
}

#[tokio::test]
async fn test_sequential_sends_match_fold() {
    let actions = vec![
        CounterAction::Increment,
        CounterAction::Decrement,
        CounterAction::Decrement,
        CounterAction::Increment,
        CounterAction::Increment,
        CounterAction::Increment,
    ];

    let store = Store::new(Counter::default(), counter());
    for action in actions.clone() {
        store.send(action).unwrap();
    }

    let reducer = counter();
    let folded = actions.into_iter().fold(Counter::default(), |mut state, action| {
        reducer.reduce(&mut state, action);
        state
    });

    assert_eq!(store.snapshot(), folded);
}

#[tokio::test]
async fn test_merged_sends_each_reduced_once() {
    #[derive(Debug, Clone, PartialEq, Default)]
    struct Seen {
        a: usize,
        b: usize,
    }

    #[derive(Debug, Clone)]
    enum Action {
        Start,
        A,
        B,
    }

    let store = Store::new(
        Seen::default(),
        from_fn(|state: &mut Seen, action| match action {
            Action::Start => Effect::merge([Effect::send(Action::A), Effect::send(Action::B)]),
            Action::A => {
                state.a += 1;
                Effect::none()
            }
            Action::B => {
                state.b += 1;
                Effect::none()
            }
        }),
    );

    store.send(Action::Start).unwrap();
    store.settled().await;

    assert_eq!(store.snapshot(), Seen { a: 1, b: 1 });
}

#[tokio::test]
async fn test_one_notification_per_outer_send() {
    let store = Store::new(Counter::default(), counter());
    let mut changes = store.subscribe();
    assert!(!changes.has_changed().unwrap());

    // Three reductions in one drain
    store.send(CounterAction::IncrementTwice).unwrap();

    assert!(changes.has_changed().unwrap());
    assert_eq!(*changes.borrow_and_update(), 1);
    assert!(!changes.has_changed().unwrap());
    assert_eq!(store.state(|s| s.count), 2);
}

#[tokio::test]
async fn test_subscriber_sees_final_state() {
    let store = Store::new(Counter::default(), counter());
    let mut changes = store.subscribe();

    let observer = {
        let store = store.clone();
        tokio::spawn(async move {
            changes.changed().await.unwrap();
            store.state(|s| s.count)
        })
    };

    store.send(CounterAction::IncrementTwice).unwrap();
    assert_eq!(observer.await.unwrap(), 2);
}

#[tokio::test]
async fn test_cancel_without_running_effect_is_noop() {
    let reductions = Arc::new(AtomicUsize::new(0));
    let store = Store::new((), {
        let reductions = reductions.clone();
        from_fn(move |_: &mut (), _action: CounterAction| {
            reductions.fetch_add(1, Ordering::SeqCst);
            Effect::cancel("nothing")
        })
    });

    store.send(CounterAction::Increment).unwrap();
    store.send(CounterAction::Increment).unwrap();

    assert_eq!(reductions.load(Ordering::SeqCst), 2);
    assert!(!store.registry().contains(&CancelKey::new("nothing")));
    assert!(store.registry().is_empty());
}

// ============================================================================
// Composition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
struct App {
    counter: Counter,
    log: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum AppAction {
    Counter(CounterAction),
    Note(String),
}

fn app() -> impl Reducer<App, AppAction> {
    Combine::new()
        .with(pullback(
            counter(),
            |app: &mut App| &mut app.counter,
            case_path!(AppAction::Counter),
        ))
        .with(from_fn(|state: &mut App, action| {
            if let AppAction::Note(note) = action {
                state.log.push(note);
            }
            Effect::none()
        }))
}

#[tokio::test]
async fn test_pullback_ignores_other_actions() {
    let reducer = pullback(
        counter(),
        |app: &mut App| &mut app.counter,
        case_path!(AppAction::Counter),
    );
    let mut state = App::default();

    let effect = reducer.reduce(&mut state, AppAction::Note("hello".into()));

    assert!(effect.is_none());
    assert_eq!(state, App::default());
}

#[tokio::test]
async fn test_composed_app_store() {
    let store = Store::new(App::default(), app());

    store.send(AppAction::Counter(CounterAction::IncrementTwice)).unwrap();
    store.send(AppAction::Note("twice".into())).unwrap();
    store.settled().await;

    let state = store.snapshot();
    assert_eq!(state.counter.count, 2);
    assert_eq!(state.log, vec!["twice".to_string()]);
}

#[tokio::test]
async fn test_scoped_store_shares_parent_state() {
    let store = Store::new(App::default(), app());
    let counter = store.scope(|app: &App| &app.counter, AppAction::Counter);
    let mut changes = store.subscribe();

    counter.send(CounterAction::Increment).unwrap();

    assert_eq!(counter.state(|c| c.count), 1);
    assert_eq!(store.state(|app| app.counter.count), 1);
    assert!(changes.has_changed().unwrap());
}
