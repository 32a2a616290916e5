//! Cancellation tasks
//!
//! A [`Task`] is a single-use cancellation flag shared by every effect joined
//! onto it. It only moves `Active -> Cancelled`; natural completion of the
//! underlying work is never recorded here.
//!
//! Cancellation is advisory. It stops propagation of actions and wakes anyone
//! waiting on [`Task::cancelled`], but work that never awaits keeps running.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Returned by operations that were interrupted by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task was cancelled")]
pub struct Cancelled;

/// One outstanding cancellable operation
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    flag: Arc<watch::Sender<bool>>,
}

impl Task {
    /// Create a new active task
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            id: TaskId::next(),
            flag: Arc::new(flag),
        }
    }

    /// Get the task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Mark the task cancelled and wake every waiter
    ///
    /// Returns `true` if this call performed the transition.
    pub fn cancel(&self) -> bool {
        !self.flag.send_replace(true)
    }

    /// Check whether the task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once the task is cancelled
    ///
    /// Resolves immediately for an already cancelled task.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration` unless the task is cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.run_until_cancelled(tokio::time::sleep(duration)).await
    }

    /// Race `fut` against cancellation of this task
    ///
    /// Cancellation wins ties, and an already cancelled task never polls `fut`.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id.0)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_starts_active() {
        let task = Task::new();
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_cancel_is_single_use() {
        let task = Task::new();
        assert!(task.cancel());
        assert!(!task.cancel());
        assert!(task.is_cancelled());
    }

    #[test]
    fn test_clones_share_flag() {
        let task = Task::new();
        let other = task.clone();
        other.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.id(), other.id());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Task::new().id(), Task::new().id());
    }

    #[test]
    fn test_ids_increase() {
        let first = Task::new().id();
        let second = Task::new().id();
        assert!(second.get() > first.get());
        assert_eq!(first.to_string(), format!("Task({})", first.get()));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let task = Task::new();
        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.cancelled().await })
        };
        tokio::task::yield_now().await;
        task.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_when_active() {
        let task = Task::new();
        assert_eq!(task.sleep(Duration::from_secs(2)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let task = Task::new();
        let canceller = task.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        assert_eq!(task.sleep(Duration::from_secs(10)).await, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_task_never_polls_future() {
        let task = Task::new();
        task.cancel();
        let result = task.run_until_cancelled(async { 42 }).await;
        assert_eq!(result, Err(Cancelled));
    }
}
