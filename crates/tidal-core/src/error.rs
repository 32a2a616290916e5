//! Error types for tidal-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// A reducer panicked; the drain was aborted and its buffered actions dropped
    ///
    /// `action_type` names the action type, not the value that was reduced.
    #[error("reducer panicked while handling {action_type}: {message}")]
    ReducerPanicked { action_type: String, message: String },

    /// A single drain reduced more actions than the configured limit
    #[error("drain exceeded {limit} actions")]
    DrainLimitExceeded { limit: usize },

    /// An asynchronous effect was scheduled without a Tokio runtime
    #[error("no Tokio runtime available to run effects")]
    NoRuntime,

    /// Store configuration could not be parsed
    #[error("invalid store config: {0}")]
    Config(#[from] ron::error::SpannedError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// Compile-time check that Error is Send + Sync for thread-safe error propagation.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_from_str() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn test_panic_message_from_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(payload.as_ref()), "bad state");
    }

    #[test]
    fn test_reducer_panicked_display() {
        let err = Error::ReducerPanicked {
            action_type: "app::Action".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "reducer panicked while handling app::Action: boom");
    }

    #[test]
    fn test_error_display() {
        let err = Error::DrainLimitExceeded { limit: 3 };
        assert_eq!(err.to_string(), "drain exceeded 3 actions");
    }
}
