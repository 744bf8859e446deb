//! Error types for relay-link.
//!
//! Precondition failures (`NotConnected`, `MessageTooLarge`, `NotARequest`,
//! `NotSupportedByServer`) are returned at the call site and never reach the
//! network. Asynchronous outcomes (server errors, timeouts, disconnects) are
//! delivered through the completion callback of the operation they belong to.

use std::time::Duration;
use thiserror::Error;

use crate::models::AckMode;

/// Errors produced by the relay-link client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayLinkError {
    /// The operation requires a `Connected` connection.
    #[error("Not connected")]
    NotConnected,

    /// The encoded envelope exceeds the server-advertised `max_size`.
    #[error("Message too large: {size} bytes exceeds server limit of {max_size} bytes")]
    MessageTooLarge { size: usize, max_size: u64 },

    /// A reply was attempted for a message that carries no reply-to address.
    #[error("Message is not a request (no reply-to address)")]
    NotARequest,

    /// The negotiated protocol version does not support this operation.
    #[error("{feature} is not supported by the server (protocol version {protocol})")]
    NotSupportedByServer { feature: &'static str, protocol: u32 },

    /// No reply arrived within the caller-specified window.
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// Protocol-level error reported by the server.
    #[error("Server error {code}: {reason}")]
    ServerError { code: i64, reason: String },

    /// The connection closed before the operation reached a terminal state.
    #[error("Connection closed{}: {reason}", .code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    ConnectionClosed { code: Option<u16>, reason: String },

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(u64),

    /// Explicit acknowledgement attempted on a subscription that is not client-ack.
    #[error("Subscription {subscription_id} uses {mode:?} acknowledgement")]
    InvalidAckMode { subscription_id: u64, mode: AckMode },

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),
}

impl RelayLinkError {
    /// Shorthand for a `ConnectionClosed` error.
    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        RelayLinkError::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Whether retrying (or waiting for auto-reconnect) may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayLinkError::NotConnected
                | RelayLinkError::RequestTimeout(_)
                | RelayLinkError::ConnectionClosed { .. }
                | RelayLinkError::WebSocketError(_)
                | RelayLinkError::TimeoutError(_)
        )
    }
}

impl From<serde_json::Error> for RelayLinkError {
    fn from(err: serde_json::Error) -> Self {
        RelayLinkError::SerializationError(err.to_string())
    }
}

/// Result type for relay-link operations.
pub type Result<T> = std::result::Result<T, RelayLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_closed_display() {
        let err = RelayLinkError::closed(Some(1006), "abnormal");
        assert_eq!(err.to_string(), "Connection closed (1006): abnormal");

        let err = RelayLinkError::closed(None, "client disconnect");
        assert_eq!(err.to_string(), "Connection closed: client disconnect");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(RelayLinkError::NotConnected.is_recoverable());
        assert!(RelayLinkError::RequestTimeout(Duration::from_secs(1)).is_recoverable());
        assert!(!RelayLinkError::NotARequest.is_recoverable());
        assert!(!RelayLinkError::ServerError {
            code: 403,
            reason: "denied".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_from_serde_error() {
        let err: RelayLinkError = serde_json::from_str::<u64>("nope").unwrap_err().into();
        assert!(matches!(err, RelayLinkError::SerializationError(_)));
    }
}
