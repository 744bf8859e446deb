//! Public connection handle with builder pattern.
//!
//! [`Connection`] is the entry point of the crate: it connects to one of a
//! list of relay servers, keeps the session alive across transport failures
//! and exposes publish/subscribe, request/reply and key-value operations.

use serde_json::Value as JsonValue;
use std::{fmt, sync::Arc, time::Duration};

use crate::{
    codec,
    connection::{
        engine::Inner, transport::Connector, websocket::WebSocketConnector, ConnectionState,
    },
    error::{RelayLinkError, Result},
    event_handlers::EventHandlers,
    models::{
        op, CompletionCallback, ConnectionOptions, Message, SessionInfo, SubscriptionInfo,
        SubscriptionOptions,
    },
    seq_index::PendingKind,
    subscription::SubscriptionListener,
    timeouts::RelayLinkTimeouts,
};

/// A reconnecting client connection.
///
/// Cheap to clone; every clone drives the same session. Operations that
/// reach the network return the sequence number they were assigned and
/// report their terminal outcome through the optional completion callback.
///
/// # Examples
///
/// ```rust,no_run
/// use relay_link::{on_complete, Connection, ConnectionOptions, Message};
///
/// # async fn example() -> relay_link::Result<()> {
/// let connection = Connection::builder()
///     .urls(["wss://relay-a.example.com", "wss://relay-b.example.com"])
///     .options(ConnectionOptions::default().with_credentials("alice", "secret"))
///     .connect()
///     .await?;
///
/// connection.publish(
///     Message::new(serde_json::json!({ "acct": 42 })),
///     Some(on_complete(|outcome| println!("publish: {:?}", outcome))),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("session", &self.session())
            .field("pending_requests", &self.inner.index.len())
            .field("subscriptions", &self.inner.registry.len())
            .finish()
    }
}

impl Connection {
    /// Create a new builder for configuring the connection
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connect over WebSocket with default timeouts and no event handlers.
    pub async fn connect<I, S>(urls: I, options: ConnectionOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().urls(urls).options(options).connect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Parameters negotiated in the most recent WELCOME.
    pub fn session(&self) -> SessionInfo {
        self.inner.session_info()
    }

    /// Sequence numbers still awaiting a terminal response, ascending.
    pub fn pending_requests(&self) -> Vec<u64> {
        self.inner.index.seqs()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.registry.snapshot()
    }

    /// Server URLs in the (shuffled) order they are tried.
    pub fn urls(&self) -> Vec<String> {
        self.inner.url_order()
    }

    pub fn timeouts(&self) -> &RelayLinkTimeouts {
        &self.inner.timeouts
    }

    /// Publish a message.
    ///
    /// With QoS the envelope carries the sequence number and `callback`
    /// fires on the server's ACK; without QoS it fires once the frame has
    /// been written to the transport.
    ///
    /// Fails immediately with `NotConnected` or `MessageTooLarge`.
    pub fn publish(&self, message: Message, callback: Option<CompletionCallback>) -> Result<u64> {
        self.inner.submit(None, callback, |seq, session| {
            let envelope = codec::message(op::MESSAGE, message.body(), session.qos.then_some(seq));
            (envelope, PendingKind::Publish { message })
        })
    }

    /// Subscribe to messages matching `matcher`. A `durable` name keeps the
    /// delivery position on the server across disconnects.
    ///
    /// Returns the subscription id. Confirmation arrives asynchronously via
    /// [`SubscriptionListener::on_subscribe`].
    pub fn subscribe(
        &self,
        matcher: Option<&str>,
        durable: Option<&str>,
        options: SubscriptionOptions,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Result<u64> {
        self.inner.subscribe(matcher, durable, options, listener)
    }

    /// Remove a subscription, deleting its durable state on the server.
    pub fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.inner.unsubscribe(subscription_id, true)
    }

    /// Stop receiving on a subscription but keep its durable state, so a
    /// later subscribe with the same durable name resumes where it left off.
    pub fn close_subscription(&self, subscription_id: u64) -> Result<()> {
        self.inner.unsubscribe(subscription_id, false)
    }

    /// Send a request and wait (asynchronously) for its reply.
    ///
    /// `callback` receives [`Completion::Reply`](crate::Completion::Reply),
    /// a server error, or `RequestTimeout` once `timeout` elapses. Exactly
    /// one of them is delivered. A zero `timeout` waits indefinitely.
    pub fn send_request(
        &self,
        message: Message,
        timeout: Duration,
        callback: CompletionCallback,
    ) -> Result<u64> {
        let request_op = self.inner.options.extended_op_codes.request;
        let seq = self.inner.submit(Some("request"), Some(callback), |seq, _| {
            let envelope = codec::message(request_op, message.body(), Some(seq));
            (
                envelope,
                PendingKind::SendRequest {
                    message,
                    timeout,
                    timer: None,
                },
            )
        })?;
        self.inner.arm_request_timer(seq, timeout);
        Ok(seq)
    }

    /// [`send_request`](Self::send_request) with the configured
    /// `request_timeout`.
    pub fn send_request_default(&self, message: Message, callback: CompletionCallback) -> Result<u64> {
        self.send_request(message, self.inner.timeouts.request_timeout, callback)
    }

    /// Reply to a received request.
    ///
    /// Fails with `NotARequest` when `request` carries no reply-to address.
    pub fn send_reply(
        &self,
        reply: Message,
        request: &Message,
        callback: Option<CompletionCallback>,
    ) -> Result<u64> {
        let reply_to = request.reply_to().ok_or(RelayLinkError::NotARequest)?;
        let request_id = request.request_id();
        let reply_op = self.inner.options.extended_op_codes.reply;

        self.inner.submit(Some("reply"), callback, |seq, session| {
            let envelope = codec::reply(
                reply_op,
                reply_to,
                request_id,
                reply.body(),
                session.qos.then_some(seq),
            );
            (envelope, PendingKind::SendReply { reply })
        })
    }

    /// Acknowledge one delivery on a client-ack subscription.
    pub fn acknowledge(&self, message: &Message) -> Result<()> {
        self.inner.acknowledge(message, false)
    }

    /// Acknowledge every delivery up to and including `message` on its
    /// client-ack subscription.
    pub fn acknowledge_all(&self, message: &Message) -> Result<()> {
        self.inner.acknowledge(message, true)
    }

    /// Handle to the server-side key-value map `name`. Nothing is sent
    /// until an operation is invoked.
    pub fn create_map(&self, name: impl Into<String>) -> RelayMap {
        RelayMap {
            connection: self.clone(),
            name: name.into(),
        }
    }

    /// Close gracefully.
    ///
    /// Frames already queued (including acknowledgements for processed
    /// deliveries) are written before DISCONNECT. Every pending request is
    /// then failed with `ConnectionClosed` and `on_disconnect` fires.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Kill the transport immediately without DISCONNECT, as if the network
    /// had failed. The connection then reconnects as configured.
    pub fn force_disconnect(&self) {
        self.inner.force_disconnect();
    }

    /// Reconnect a `Disconnected` connection, keeping its subscriptions.
    /// Resolves on the next WELCOME. Calls made while that attempt is
    /// still waiting for its WELCOME resolve with it; in any other state
    /// this is a no-op.
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect().await
    }

    fn map_op(
        &self,
        op_code: u16,
        map: &str,
        key: Option<&str>,
        value: Option<&JsonValue>,
        callback: Option<CompletionCallback>,
    ) -> Result<u64> {
        let feature = (op_code == self.inner.options.extended_op_codes.map_destroy).then_some("map destroy");
        self.inner.submit(feature, callback, |seq, _| {
            let envelope = codec::map_op(op_code, map, key, value, Some(seq));
            (
                envelope,
                PendingKind::MapOperation {
                    map: map.to_string(),
                    key: key.map(str::to_string),
                },
            )
        })
    }
}

/// A server-side key-value map.
///
/// Every operation resolves on MAP_RESPONSE with
/// [`Completion::Map`](crate::Completion::Map); `get` of an existing key
/// carries the stored value.
#[derive(Debug, Clone)]
pub struct RelayMap {
    connection: Connection,
    name: String,
}

impl RelayMap {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self, key: &str, value: JsonValue, callback: Option<CompletionCallback>) -> Result<u64> {
        self.connection
            .map_op(op::MAP_SET, &self.name, Some(key), Some(&value), callback)
    }

    pub fn get(&self, key: &str, callback: CompletionCallback) -> Result<u64> {
        self.connection
            .map_op(op::MAP_GET, &self.name, Some(key), None, Some(callback))
    }

    pub fn remove(&self, key: &str, callback: Option<CompletionCallback>) -> Result<u64> {
        self.connection
            .map_op(op::MAP_REMOVE, &self.name, Some(key), None, callback)
    }

    /// Drop the whole map. Requires a server protocol with extended op codes.
    pub fn destroy(&self, callback: Option<CompletionCallback>) -> Result<u64> {
        let op_code = self.connection.inner.options.extended_op_codes.map_destroy;
        self.connection.map_op(op_code, &self.name, None, None, callback)
    }
}

/// Builder for configuring [`Connection`] instances.
pub struct ConnectionBuilder {
    urls: Vec<String>,
    options: ConnectionOptions,
    timeouts: RelayLinkTimeouts,
    handlers: EventHandlers,
    connector: Option<Arc<dyn Connector>>,
    rng_seed: Option<u64>,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("urls", &self.urls)
            .field("options", &self.options)
            .field("timeouts", &self.timeouts)
            .field("custom_connector", &self.connector.is_some())
            .field("rng_seed", &self.rng_seed)
            .finish()
    }
}

impl ConnectionBuilder {
    fn new() -> Self {
        Self {
            urls: Vec::new(),
            options: ConnectionOptions::default(),
            timeouts: RelayLinkTimeouts::default(),
            handlers: EventHandlers::default(),
            connector: None,
            rng_seed: None,
        }
    }

    /// Add one server URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Add several server URLs. They are shuffled once at connect time.
    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set comprehensive timeout configuration
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use relay_link::{Connection, RelayLinkTimeouts};
    ///
    /// # async fn example() -> relay_link::Result<()> {
    /// let connection = Connection::builder()
    ///     .url("ws://localhost:7800")
    ///     .timeouts(RelayLinkTimeouts::fast())
    ///     .connect()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: RelayLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replace the WebSocket transport, e.g. with a
    /// [`MemoryConnector`](crate::MemoryConnector).
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Seed the URL shuffle and backoff jitter.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Connect and wait for the first WELCOME.
    ///
    /// Fails with `ConfigurationError` without a URL or outside a tokio
    /// runtime, and with `ConnectionClosed` once the reconnect budget is
    /// spent before any server welcomed the client.
    pub async fn connect(self) -> Result<Connection> {
        let urls: Vec<String> = self
            .urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(RelayLinkError::ConfigurationError(
                "at least one server URL is required".into(),
            ));
        }

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new()));
        let inner = Inner::new(
            urls,
            self.options,
            self.timeouts,
            self.handlers,
            connector,
            self.rng_seed,
        )?;
        inner.start().await?;
        Ok(Connection { inner })
    }
}
