//! Cancellation registry
//!
//! Maps a [`CancelKey`] to the single active [`Task`] for that key. Every
//! store owns its own registry (or shares one explicitly), so two stores never
//! interfere on the same key.
//!
//! Acquiring a key that already has an active task joins onto that task: all
//! effects scheduled under one key share one cancellation flag. An entry is
//! removed when its key is cancelled or when the last joined effect finishes.

use crate::key::CancelKey;
use crate::task::{Task, TaskId};
use indexmap::IndexMap;
use parking_lot::Mutex;

#[derive(Debug)]
struct Entry {
    task: Task,
    /// Effects currently running under this task
    joined: usize,
}

/// Per-store mapping from cancellation key to active task
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<IndexMap<CancelKey, Entry>>,
}

impl CancellationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the active task for `key`, creating one if needed
    ///
    /// The caller must pair this with [`release`](Self::release) once its
    /// effect finishes.
    pub fn acquire(&self, key: &CancelKey) -> Task {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            if !entry.task.is_cancelled() {
                entry.joined += 1;
                tracing::debug!(?key, task = %entry.task.id(), joined = entry.joined, "joined existing task");
                return entry.task.clone();
            }
        }

        let task = Task::new();
        tracing::debug!(?key, task = %task.id(), "created task");
        entries.insert(
            key.clone(),
            Entry {
                task: task.clone(),
                joined: 1,
            },
        );
        task
    }

    /// Signal that one effect joined onto `task` under `key` has finished
    ///
    /// Entries belonging to a different (newer) task are left alone.
    pub fn release(&self, key: &CancelKey, task: TaskId) {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.task.id() != task {
            return;
        }

        entry.joined = entry.joined.saturating_sub(1);
        if entry.joined == 0 {
            entries.shift_remove(key);
            tracing::debug!(?key, %task, "evicted finished task");
        }
    }

    /// Cancel and evict the task under `key`
    ///
    /// Returns `false` when no task exists for `key`, which is not an error.
    pub fn cancel(&self, key: &CancelKey) -> bool {
        let removed = self.entries.lock().shift_remove(key);
        match removed {
            Some(entry) => {
                entry.task.cancel();
                tracing::debug!(?key, task = %entry.task.id(), "cancelled task");
                true
            }
            None => {
                tracing::trace!(?key, "cancel for unknown key ignored");
                false
            }
        }
    }

    /// Cancel and evict every task, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries.lock().drain(..).map(|(_, e)| e).collect();
        for entry in &drained {
            entry.task.cancel();
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "cancelled all tasks");
        }
        drained.len()
    }

    /// Peek at the active task for `key`
    pub fn task(&self, key: &CancelKey) -> Option<Task> {
        self.entries.lock().get(key).map(|entry| entry.task.clone())
    }

    /// Check whether `key` currently has a task
    pub fn contains(&self, key: &CancelKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Keys with a task, in creation order
    pub fn keys(&self) -> Vec<CancelKey> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of keys with a task
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if no key has a task
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
