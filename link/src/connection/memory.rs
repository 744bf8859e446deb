//! In-memory transport.
//!
//! [`MemoryConnector`] opens in-process transports and plays the server side
//! of each one through a [`MemoryServer`] handle: every frame the client
//! writes is captured in order, frames and close codes can be injected, and
//! connect attempts can be refused per URL. Optionally it answers LOGIN with
//! a canned WELCOME so a connection can come up without a driving task.
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_link::{op, Connection, Envelope, MemoryConnector};
//!
//! # async fn example() -> relay_link::Result<()> {
//! let welcome = Envelope {
//!     qos: Some(true),
//!     protocol: Some(1),
//!     ..Envelope::new(op::WELCOME)
//! };
//! let connector = MemoryConnector::new().with_welcome(welcome);
//!
//! let connection = Connection::builder()
//!     .url("ws://relay-a")
//!     .connector(connector.clone())
//!     .connect()
//!     .await?;
//!
//! let server = connector.wait_for_server(1).await;
//! assert_eq!(server.written_ops()[0], op::LOGIN);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::transport::{Connector, FrameSink, FrameStream, InboundFrame};
use crate::{
    codec,
    error::{RelayLinkError, Result},
    models::{op, ConnectionOptions, Envelope},
};

/// One connect attempt observed by a [`MemoryConnector`].
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub url: String,
    pub at: Instant,
    pub accepted: bool,
}

#[derive(Default)]
struct ConnectorState {
    /// Remaining refusals per URL. `u32::MAX` refuses forever.
    refusals: HashMap<String, u32>,
    /// Refuse the next N attempts whatever their URL.
    refuse_next: u32,
    welcome: Option<Envelope>,
    attempts: Vec<ConnectAttempt>,
    servers: Vec<MemoryServer>,
}

#[derive(Default)]
struct ConnectorShared {
    state: Mutex<ConnectorState>,
    changed: Notify,
}

/// In-process [`Connector`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<ConnectorShared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every LOGIN with `welcome`.
    pub fn with_welcome(self, welcome: Envelope) -> Self {
        self.set_welcome(Some(welcome));
        self
    }

    /// Change the canned WELCOME used by transports opened from now on.
    pub fn set_welcome(&self, welcome: Option<Envelope>) {
        self.shared.state.lock().welcome = welcome;
    }

    /// Refuse the next `times` attempts to `url`.
    pub fn refuse(&self, url: &str, times: u32) {
        self.shared.state.lock().refusals.insert(url.to_string(), times);
    }

    pub fn refuse_always(&self, url: &str) {
        self.refuse(url, u32::MAX);
    }

    /// Refuse the next `times` attempts, whatever URL they target.
    pub fn refuse_next(&self, times: u32) {
        self.shared.state.lock().refuse_next = times;
    }

    /// Stop refusing `url`.
    pub fn accept(&self, url: &str) {
        self.shared.state.lock().refusals.remove(url);
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.shared.state.lock().attempts.clone()
    }

    /// Server handles of every accepted transport, oldest first.
    pub fn servers(&self) -> Vec<MemoryServer> {
        self.shared.state.lock().servers.clone()
    }

    pub fn latest(&self) -> Option<MemoryServer> {
        self.shared.state.lock().servers.last().cloned()
    }

    /// Wait until `n` transports have been accepted and return the `n`th.
    pub async fn wait_for_server(&self, n: usize) -> MemoryServer {
        loop {
            let changed = self.shared.changed.notified();
            if let Some(server) = self.shared.state.lock().servers.get(n.saturating_sub(1)) {
                return server.clone();
            }
            changed.await;
        }
    }

    /// Wait until `n` connect attempts have been made.
    pub async fn wait_for_attempts(&self, n: usize) -> Vec<ConnectAttempt> {
        loop {
            let changed = self.shared.changed.notified();
            {
                let state = self.shared.state.lock();
                if state.attempts.len() >= n {
                    return state.attempts.clone();
                }
            }
            changed.await;
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        url: &str,
        _options: &ConnectionOptions,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let result = {
            let mut state = self.shared.state.lock();
            let refused = if state.refuse_next > 0 {
                state.refuse_next -= 1;
                true
            } else {
                match state.refusals.get_mut(url) {
                    Some(remaining) if *remaining > 0 => {
                        if *remaining != u32::MAX {
                            *remaining -= 1;
                        }
                        true
                    },
                    _ => false,
                }
            };

            state.attempts.push(ConnectAttempt {
                url: url.to_string(),
                at: Instant::now(),
                accepted: !refused,
            });

            if refused {
                Err(RelayLinkError::WebSocketError(format!("Connection refused: {}", url)))
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                let server = MemoryServer::new(url, tx, state.welcome.clone());
                state.servers.push(server.clone());
                Ok((server, rx))
            }
        };
        self.shared.changed.notify_waiters();

        let (server, rx) = result?;
        log::debug!("[relay-link] Memory transport opened to {}", url);
        Ok((
            Box::new(MemorySink { server }),
            Box::new(MemoryStream { rx }),
        ))
    }
}

struct ServerShared {
    url: String,
    written: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundFrame>>>,
    client_close: Mutex<Option<(u16, String)>>,
    welcome: Option<Envelope>,
    changed: Notify,
}

/// Server side of one in-memory transport.
#[derive(Clone)]
pub struct MemoryServer {
    shared: Arc<ServerShared>,
}

impl MemoryServer {
    fn new(url: &str, inbound: mpsc::UnboundedSender<InboundFrame>, welcome: Option<Envelope>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                url: url.to_string(),
                written: Mutex::new(Vec::new()),
                inbound: Mutex::new(Some(inbound)),
                client_close: Mutex::new(None),
                welcome,
                changed: Notify::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Every frame the client wrote, in write order.
    pub fn written(&self) -> Vec<String> {
        self.shared.written.lock().clone()
    }

    /// Written frames decoded as envelopes.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.written()
            .iter()
            .filter_map(|text| codec::decode(text).ok())
            .collect()
    }

    pub fn written_ops(&self) -> Vec<u16> {
        self.envelopes().iter().map(|e| e.op).collect()
    }

    /// Wait until the client has written at least `n` frames.
    pub async fn wait_for_written(&self, n: usize) -> Vec<String> {
        loop {
            let changed = self.shared.changed.notified();
            {
                let written = self.shared.written.lock();
                if written.len() >= n {
                    return written.clone();
                }
            }
            changed.await;
        }
    }

    /// Wait until the client has written an envelope matching `pred`, and
    /// return the first one that does.
    pub async fn wait_for(&self, pred: impl Fn(&Envelope) -> bool) -> Envelope {
        loop {
            let changed = self.shared.changed.notified();
            if let Some(found) = self.envelopes().into_iter().find(|e| pred(e)) {
                return found;
            }
            changed.await;
        }
    }

    pub async fn wait_for_op(&self, op_code: u16) -> Envelope {
        self.wait_for(|e| e.op == op_code).await
    }

    /// Deliver a text frame to the client. Returns `false` if the transport
    /// is already gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(InboundFrame::Text(text.into()))
    }

    pub fn send(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Close the transport from the server side with a close code.
    pub fn close(&self, code: u16, reason: &str) {
        self.push(InboundFrame::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
        self.shared.inbound.lock().take();
        self.shared.changed.notify_waiters();
    }

    /// Drop the transport without a close frame.
    pub fn drop_transport(&self) {
        self.shared.inbound.lock().take();
        self.shared.changed.notify_waiters();
    }

    pub fn is_open(&self) -> bool {
        self.shared.inbound.lock().is_some()
    }

    /// Close code and reason the client closed the transport with.
    pub fn client_close(&self) -> Option<(u16, String)> {
        self.shared.client_close.lock().clone()
    }

    /// Wait until the transport is gone.
    pub async fn wait_closed(&self) {
        loop {
            let changed = self.shared.changed.notified();
            if !self.is_open() {
                return;
            }
            changed.await;
        }
    }

    fn push(&self, frame: InboundFrame) -> bool {
        match self.shared.inbound.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn record_write(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(RelayLinkError::WebSocketError(format!(
                "Transport to {} is closed",
                self.shared.url
            )));
        }
        self.shared.written.lock().push(text.to_string());

        if let Some(welcome) = &self.shared.welcome {
            if codec::decode(text).map(|e| e.op == op::LOGIN).unwrap_or(false) {
                self.send(welcome);
            }
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    fn record_client_close(&self, code: u16, reason: &str) {
        {
            let mut close = self.shared.client_close.lock();
            if close.is_some() {
                return;
            }
            *close = Some((code, reason.to_string()));
        }
        self.close(code, reason);
    }
}

struct MemorySink {
    server: MemoryServer,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.server.record_write(text)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.server.record_client_close(code, reason);
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<InboundFrame>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame>> {
        self.rx.recv().await.map(Ok)
    }
}
