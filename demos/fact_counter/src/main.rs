//! Fact Counter
//!
//! Two features composed into one store:
//! - a counter that can be incremented and decremented
//! - a slow "number fact" fetch that can be cancelled before it answers
//!
//! Run with `RUST_LOG=tidal_core=debug` to watch drains and cancellations.

use std::path::Path;
use std::time::Duration;
use tidal_core::reducer::{from_fn, pullback};
use tidal_core::{case_path, Combine, Effect, Reducer, Store, StoreConfig};
use tracing_subscriber::EnvFilter;

/// How long the pretend network call takes
const FETCH_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// Counter feature
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Counter {
    count: i64,
}

#[derive(Debug, Clone)]
enum CounterAction {
    Increment,
    Decrement,
}

fn counter() -> impl Reducer<Counter, CounterAction> {
    from_fn(|state: &mut Counter, action| {
        match action {
            CounterAction::Increment => state.count += 1,
            CounterAction::Decrement => state.count -= 1,
        }
        Effect::none()
    })
}

// ============================================================================
// Fact feature
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Fact {
    fact: Option<String>,
    is_loading: bool,
}

#[derive(Debug, Clone)]
enum FactAction {
    Requested(i64),
    Loaded(String),
    Failed(String),
    CancelRequested,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct FetchId;

async fn fetch_fact(n: i64) -> anyhow::Result<String> {
    tokio::time::sleep(FETCH_DELAY).await;
    if n < 0 {
        anyhow::bail!("no facts about negative numbers");
    }
    Ok(format!("{n} is the number of times you pressed the button"))
}

fn fact() -> impl Reducer<Fact, FactAction> {
    from_fn(|state: &mut Fact, action| match action {
        FactAction::Requested(n) => {
            state.fact = None;
            state.is_loading = true;
            Effect::try_future(async move { fetch_fact(n).await.map(FactAction::Loaded) })
                .catch(|error| FactAction::Failed(error.to_string()))
                .cancellable_in_flight(FetchId)
        }
        FactAction::Loaded(fact) => {
            state.fact = Some(fact);
            state.is_loading = false;
            Effect::none()
        }
        FactAction::Failed(reason) => {
            tracing::warn!(%reason, "fact fetch failed");
            state.is_loading = false;
            Effect::none()
        }
        FactAction::CancelRequested => {
            state.is_loading = false;
            Effect::cancel(FetchId)
        }
    })
}

// ============================================================================
// App
// ============================================================================

#[derive(Debug, Clone, Default)]
struct App {
    counter: Counter,
    fact: Fact,
}

#[derive(Debug, Clone)]
enum AppAction {
    Counter(CounterAction),
    Fact(FactAction),
    FactButtonTapped,
}

fn app() -> impl Reducer<App, AppAction> {
    Combine::new()
        .with(pullback(counter(), |app: &mut App| &mut app.counter, case_path!(AppAction::Counter)))
        .with(pullback(fact(), |app: &mut App| &mut app.fact, case_path!(AppAction::Fact)))
        .with(from_fn(|state: &mut App, action| match action {
            AppAction::FactButtonTapped => {
                Effect::send(AppAction::Fact(FactAction::Requested(state.counter.count)))
            }
            _ => Effect::none(),
        }))
}

fn load_config() -> anyhow::Result<StoreConfig> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fact_counter.ron");
    if !path.exists() {
        return Ok(StoreConfig::named("fact_counter"));
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(StoreConfig::from_ron(&text)?)
}

fn print_state(store: &Store<App, AppAction>) {
    store.state(|app| {
        let fact = match (&app.fact.fact, app.fact.is_loading) {
            (_, true) => "loading...",
            (Some(fact), false) => fact.as_str(),
            (None, false) => "-",
        };
        println!("count: {:>3}   fact: {}", app.counter.count, fact);
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    tracing::info!(name = config.name(), "starting store");
    let store = Store::with_config(App::default(), app(), config);

    let mut changes = store.subscribe();
    let watcher = tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            tracing::debug!(revision = *changes.borrow_and_update(), "state changed");
        }
    });

    let counter = store.scope(|app: &App| &app.counter, AppAction::Counter);
    counter.send(CounterAction::Increment)?;
    counter.send(CounterAction::Increment)?;
    counter.send(CounterAction::Increment)?;
    print_state(&store);

    // Fetch and wait for the answer
    store.send(AppAction::FactButtonTapped)?;
    print_state(&store);
    store.settled().await;
    print_state(&store);

    // Fetch and change our mind
    counter.send(CounterAction::Decrement)?;
    store.send(AppAction::FactButtonTapped)?;
    print_state(&store);
    store.send(AppAction::Fact(FactAction::CancelRequested))?;
    tokio::time::sleep(FETCH_DELAY * 2).await;
    store.settled().await;
    print_state(&store);

    // A fetch that fails is turned into an action
    for _ in 0..5 {
        counter.send(CounterAction::Decrement)?;
    }
    store.send(AppAction::FactButtonTapped)?;
    store.settled().await;
    print_state(&store);

    tracing::info!(revision = store.revision(), "done");
    drop(counter);
    drop(store);
    watcher.await?;
    Ok(())
}
