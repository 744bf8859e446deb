//! Connection engine.
//!
//! This module contains:
//! - [`transport`]: the `Connector` / `FrameSink` / `FrameStream` seam
//! - [`websocket`]: tokio-tungstenite transport
//! - [`memory`]: in-memory transport with a scriptable fake server
//! - [`reconnect`]: URL failover and backoff scheduling
//! - `writer`: the single outbound writer task
//! - `engine`: shared state, submit path, inbound dispatch and the
//!   supervisor loop that owns the transport

pub(crate) mod engine;
pub mod memory;
pub mod reconnect;
pub mod transport;
pub mod websocket;
pub(crate) mod writer;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub use memory::{MemoryConnector, MemoryServer};
pub use reconnect::{ReconnectScheduler, ReconnectStep};
pub use transport::{Connector, FrameSink, FrameStream, InboundFrame};
pub use websocket::WebSocketConnector;

/// Normal closure.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Abnormal closure (transport lost without a close frame).
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Server is restarting. Always reconnects, with a fresh reconnect budget.
pub const CLOSE_CODE_SERVICE_RESTART: u16 = 1012;

/// Lifecycle state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, no transport opened yet.
    Init,
    /// Opening the first transport, or reopening after an explicit reconnect.
    Connecting,
    /// WELCOME received. Operations are accepted.
    Connected,
    /// Graceful disconnect in progress.
    Disconnecting,
    /// Transport lost; the reconnect algorithm is running.
    Reconnecting,
    /// Torn down. Only `reconnect()` leaves this state.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Init => "init",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Run a user callback, containing any panic it raises.
pub(crate) fn invoke_guarded(context: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::warn!("[relay-link] {} callback panicked; ignoring", context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_guarded_contains_panic() {
        let mut ran = false;
        invoke_guarded("test", || ran = true);
        assert!(ran);
        invoke_guarded("test", || panic!("boom"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
