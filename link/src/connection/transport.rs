//! Transport seam.
//!
//! The engine only ever talks to the network through these traits. A
//! [`Connector`] opens one transport per connection attempt and hands back
//! its two halves: the sink is owned by the writer task, the stream by the
//! supervisor loop.

use async_trait::async_trait;

use crate::{error::Result, models::ConnectionOptions};

/// One inbound frame, already reduced to what the protocol layer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A complete text frame (one envelope).
    Text(String),
    /// The peer closed the transport.
    Closed { code: Option<u16>, reason: String },
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Close the transport. Closing an already closed sink is not an error.
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound frame, or `None` once the transport is gone.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame>>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}
