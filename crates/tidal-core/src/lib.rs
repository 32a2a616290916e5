//! Tidal Core - Unidirectional state runtime with cancellable effects
//!
//! This crate provides the pieces of a reducer-driven application runtime:
//! - [`Store`]: owns one state value, serializes every mutation through `send`
//! - [`Reducer`]: `(&mut State, Action) -> Effect<Action>` plus composition
//!   (`combine`, `pullback`, `optional`, `Store::scope`)
//! - [`Effect`]: declarative description of future work
//! - [`Task`] and [`CancellationRegistry`]: cooperative cancellation by key
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use tidal_core::{reducer, Effect, Store};
//!
//! #[derive(Debug, Default)]
//! struct Search { results: Vec<String>, loading: bool }
//!
//! #[derive(Debug)]
//! enum Action { Query(String), Loaded(Vec<String>), Cancel }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Store::new(
//!     Search::default(),
//!     reducer::from_fn(|state: &mut Search, action| match action {
//!         Action::Query(query) => {
//!             state.loading = true;
//!             Effect::future(async move {
//!                 tokio::time::sleep(Duration::from_millis(5)).await;
//!                 Action::Loaded(vec![query])
//!             })
//!             .cancellable_in_flight("search")
//!         }
//!         Action::Loaded(results) => {
//!             state.loading = false;
//!             state.results = results;
//!             Effect::none()
//!         }
//!         Action::Cancel => {
//!             state.loading = false;
//!             Effect::cancel("search")
//!         }
//!     }),
//! );
//!
//! store.send(Action::Query("tide".into())).unwrap();
//! store.settled().await;
//! assert_eq!(store.state(|s| s.results.clone()), vec!["tide".to_string()]);
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Cancellation is advisory: cancelling a key guarantees that no further
//! action from effects bound to it reaches the reducer, and drops their
//! futures at the next await point. Work that never yields keeps running.

mod config;
pub mod effect;
mod error;
mod key;
pub mod reducer;
mod registry;
pub mod runtime;
mod store;
pub mod task;

pub use config::{StoreConfig, DEFAULT_MAX_ACTIONS_PER_DRAIN};
pub use effect::{Effect, Emitter, Publisher};
pub use error::{Error, Result};
pub use key::CancelKey;
pub use reducer::{combine, optional, pullback, CasePath, Combine, Reducer};
pub use registry::CancellationRegistry;
pub use runtime::EffectRunner;
pub use store::{ScopedStore, Store, StoreBuilder};
pub use task::{Cancelled, Task, TaskId};
