//! # relay-link
//!
//! Reconnecting publish/subscribe client for relay servers speaking the
//! JSON envelope protocol over WebSocket.
//!
//! - Publish with optional QoS: sequence-numbered, acknowledged delivery
//!   that survives reconnects when the server resumes the session.
//! - Subscriptions with auto, client or no acknowledgement, optionally
//!   durable and filtered by a matcher expression.
//! - Request/reply with per-request timeouts.
//! - Server-side key-value maps.
//! - URL failover across a cluster with exponential backoff.
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_link::{Connection, ConnectionOptions, SubscriptionHandlers, SubscriptionOptions};
//!
//! # async fn example() -> relay_link::Result<()> {
//! let connection = Connection::connect(
//!     ["wss://relay.example.com"],
//!     ConnectionOptions::default().with_credentials("alice", "secret"),
//! )
//! .await?;
//!
//! let listener = SubscriptionHandlers::new()
//!     .on_messages(|id, messages| println!("subscription {}: {} message(s)", id, messages.len()))
//!     .into_listener();
//! connection.subscribe(Some("acct > 10"), None, SubscriptionOptions::default(), listener)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod seq_index;
pub mod subscription;
pub mod timeouts;

pub use client::{Connection, ConnectionBuilder, RelayMap};
pub use connection::{
    ConnectionState, Connector, FrameSink, FrameStream, InboundFrame, MemoryConnector, MemoryServer,
    WebSocketConnector,
};
pub use error::{RelayLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    on_complete, op, AckMode, Completion, CompletionCallback, ConnectionOptions, Destination,
    Envelope, ExtendedOpCodes, Message, SessionInfo, SubscriptionInfo, SubscriptionOptions,
};
pub use subscription::{SubscriptionHandlers, SubscriptionListener};
pub use timeouts::{RelayLinkTimeouts, RelayLinkTimeoutsBuilder};
