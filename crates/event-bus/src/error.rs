//! # Error Types
//!
//! Errors surfaced by the bus, its transports, and the event manager.

use std::time::Duration;
use thiserror::Error;

/// Error returned by application handlers and middleware.
///
/// Handlers may fail with any error type; the original error is preserved so
/// callers can `downcast_ref` it after retries are exhausted.
pub type HandlerError = anyhow::Error;

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors from event bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The transport could not be reached or failed its liveness probe.
    #[error("Failed to connect to transport: {0}")]
    Connection(String),

    /// An operation that needs a live connection was attempted without one.
    #[error("Event bus is not connected")]
    NotConnected,

    /// An event could not be encoded or an inbound payload could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An application callback failed while handling a delivered event.
    #[error("Callback for pattern {pattern} failed: {message}")]
    Callback { pattern: String, message: String },

    /// A request/response exchange did not complete before its deadline.
    #[error("Request {request_type} timed out after {timeout:?}")]
    Timeout {
        request_type: String,
        timeout: Duration,
    },

    /// A subscription pattern could not be compiled.
    #[error("Invalid channel pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A request event is missing the fields needed to reply to it.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A transient transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport connection is gone and will not recover.
    #[error("Transport disconnected: {0}")]
    Disconnected(String),
}

impl BusError {
    /// Short label used for error metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::NotConnected => "not_connected",
            Self::Serialization(_) => "serialization",
            Self::Callback { .. } => "callback",
            Self::Timeout { .. } => "timeout",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Transport(_) => "transport",
            Self::Disconnected(_) => "disconnected",
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
