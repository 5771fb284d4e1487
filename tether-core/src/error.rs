//! Error types for the reactive engine.
//!
//! Two families of failure exist:
//!
//! - Misuse of the API (reading a disposed signal, running a disposed monitor,
//!   a computation that reads itself). The infallible entry points panic with
//!   the error's message; the `try_*` variants return it.
//! - Recoverable failures (a comparator rejecting a write, a listener
//!   panicking during an emit, a flush that never settles). These are always
//!   returned to the caller.

use thiserror::Error;

use crate::graph::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by signals, monitors, emitters and the scheduler.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A signal was read or written after `dispose()`.
    #[error("signal {0} has been disposed")]
    SignalDisposed(NodeId),

    /// A monitor was used after `dispose()`.
    #[error("monitor {0} has been disposed")]
    MonitorDisposed(NodeId),

    /// A write reached a derived signal.
    #[error("signal {0} is derived and cannot be written")]
    ReadOnly(NodeId),

    /// A computation re-entered itself while it was still tracking.
    #[error("cycle detected: node {0} was read while computing itself")]
    Cycle(NodeId),

    /// A custom comparator failed; the write was not applied.
    #[error("comparator failed: {0}")]
    Compare(#[from] CompareError),

    /// A listener panicked while being notified.
    #[error("listener panicked: {0}")]
    ListenerPanicked(String),

    /// Flushing kept producing new work past the configured round limit.
    #[error("flush did not settle after {0} rounds")]
    FlushLimitExceeded(usize),

    /// A runtime configuration document could not be parsed.
    #[error("invalid runtime config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Failure reported by a fallible comparator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompareError {
    message: String,
}

impl CompareError {
    /// Create a comparator error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message supplied by the comparator.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
