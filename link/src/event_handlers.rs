//! Connection lifecycle event handlers for the relay-link client.
//!
//! Provides callback-based hooks for monitoring connection events:
//!
//! - [`on_connect`](EventHandlers::on_connect): Fired on the first successful login
//! - [`on_reconnect`](EventHandlers::on_reconnect): Fired on every later successful login
//! - [`on_disconnect`](EventHandlers::on_disconnect): Fired when the connection is torn down for good
//! - [`on_error`](EventHandlers::on_error): Fired on connection or protocol errors
//! - [`on_state_change`](EventHandlers::on_state_change): Fired on every state transition
//! - [`on_receive`](EventHandlers::on_receive): Optional debug hook for all incoming frames
//! - [`on_send`](EventHandlers::on_send): Optional debug hook for all outgoing frames
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_link::{Connection, EventHandlers};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = EventHandlers::new()
//!     .on_connect(|| {
//!         println!("Connected!");
//!     })
//!     .on_disconnect(|reason| {
//!         println!("Disconnected: {}", reason);
//!     })
//!     .on_error(|error| {
//!         eprintln!("Connection error: {}", error);
//!     });
//!
//! let connection = Connection::builder()
//!     .url("wss://relay.example.com/ws")
//!     .event_handlers(handlers)
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::connection::ConnectionState;
use crate::error::RelayLinkError;

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// Close code, if available (e.g. 1000 = normal, 1006 = abnormal, or a GOODBYE code).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Server error code, when the error came from the server.
    pub code: Option<i64>,
    /// Whether this error is recoverable (i.e. auto-reconnect may succeed).
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            code: None,
            recoverable,
        }
    }

    /// A server-reported error. The connection stays open.
    pub fn server(code: i64, reason: impl Into<String>) -> Self {
        Self {
            message: reason.into(),
            code: Some(code),
            recoverable: true,
        }
    }
}

impl From<&RelayLinkError> for ConnectionError {
    fn from(err: &RelayLinkError) -> Self {
        let code = match err {
            RelayLinkError::ServerError { code, .. } => Some(*code),
            RelayLinkError::ConnectionClosed { code, .. } => code.map(i64::from),
            _ => None,
        };
        Self {
            message: err.to_string(),
            code,
            recoverable: err.is_recoverable(),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

pub type OnReconnectCallback = Arc<dyn Fn() + Send + Sync>;

pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Receives `(old, new)` on every state transition.
pub type OnStateChangeCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Debug hook for all inbound frame texts.
pub type OnReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Debug hook for all outbound frame texts.
pub type OnSendCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers are `Send + Sync` and may be invoked
/// from the background connection task. A panicking handler is caught and
/// logged; it never disturbs the connection.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_reconnect: Option<OnReconnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_state_change: Option<OnStateChangeCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
    pub(crate) on_send: Option<OnSendCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked on the first successful login of the
    /// connection's lifetime.
    ///
    /// # Example
    /// ```rust
    /// use relay_link::EventHandlers;
    ///
    /// let handlers = EventHandlers::new()
    ///     .on_connect(|| println!("Connected!"));
    /// ```
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked on every successful login after the first.
    pub fn on_reconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the connection is torn down
    /// (explicit disconnect, GOODBYE, or reconnect budget exhausted).
    ///
    /// Every pending request has already been failed when this fires.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection or protocol error occurs.
    ///
    /// Also receives asynchronous operation failures whose operation had no
    /// completion callback.
    ///
    /// # Example
    /// ```rust
    /// use relay_link::EventHandlers;
    ///
    /// let handlers = EventHandlers::new()
    ///     .on_error(|err| eprintln!("Error (recoverable={}): {}", err.recoverable, err));
    /// ```
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked on every [`ConnectionState`] transition.
    pub fn on_state_change(
        mut self,
        f: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every raw frame received from the server.
    ///
    /// # Example
    /// ```rust
    /// use relay_link::EventHandlers;
    ///
    /// let handlers = EventHandlers::new()
    ///     .on_receive(|msg| println!("[RECV] {}", msg));
    /// ```
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every raw frame written to the transport.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_reconnect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_state_change.is_some()
            || self.on_receive.is_some()
            || self.on_send.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            crate::connection::invoke_guarded("on_connect", || cb());
        }
    }

    pub(crate) fn emit_reconnect(&self) {
        if let Some(cb) = &self.on_reconnect {
            crate::connection::invoke_guarded("on_reconnect", || cb());
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            crate::connection::invoke_guarded("on_disconnect", || cb(reason));
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        match &self.on_error {
            Some(cb) => crate::connection::invoke_guarded("on_error", || cb(error)),
            None => log::warn!("[relay-link] Unhandled connection error: {}", error),
        }
    }

    pub(crate) fn emit_state_change(&self, old: ConnectionState, new: ConnectionState) {
        if let Some(cb) = &self.on_state_change {
            crate::connection::invoke_guarded("on_state_change", || cb(old, new));
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            crate::connection::invoke_guarded("on_receive", || cb(raw));
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            crate::connection::invoke_guarded("on_send", || cb(raw));
        }
    }
}
