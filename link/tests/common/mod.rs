//! Shared harness for the integration tests.
//!
//! Every test drives a real [`Connection`] against the in-memory transport:
//! the [`MemoryConnector`] plays the relay server, answering LOGIN with a
//! scripted WELCOME and recording every frame the client writes.

#![allow(dead_code)]

use parking_lot::Mutex;
use relay_link::{
    op, Completion, CompletionCallback, Connection, ConnectionError, ConnectionOptions,
    ConnectionState, DisconnectReason, Envelope, EventHandlers, MemoryConnector, Message,
    RelayLinkError, RelayLinkTimeouts, SubscriptionListener,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const URL: &str = "ws://relay-a.test";

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// WELCOME for protocol 1 with the given QoS flag and size limit.
pub fn welcome(qos: bool, max_size: u64) -> Envelope {
    Envelope {
        client_id: Some("client-1".to_string()),
        id_token: Some("token-1".to_string()),
        protocol: Some(1),
        qos: Some(qos),
        max_size: Some(max_size),
        ..Envelope::new(op::WELCOME)
    }
}

pub fn resumed_welcome(qos: bool) -> Envelope {
    Envelope {
        resume: Some(true),
        id_token: Some("token-2".to_string()),
        ..welcome(qos, 0)
    }
}

pub fn ack(seq: u64) -> Envelope {
    Envelope {
        seq: Some(seq),
        ..Envelope::new(op::ACK)
    }
}

pub fn event(subscription_id: u64, seq: u64, body: serde_json::Value) -> Envelope {
    Envelope {
        to: Some(relay_link::Destination::Subscription(subscription_id)),
        seq: Some(seq),
        body: Some(body),
        ..Envelope::new(op::EVENT)
    }
}

/// Fail the test instead of hanging when `fut` never completes.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting for the connection")
}

/// Poll `cond` until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Connect to [`URL`] through `connector` with default options.
pub async fn connect(connector: &MemoryConnector) -> Connection {
    connect_with(connector, &[URL], ConnectionOptions::default(), EventHandlers::new())
        .await
        .expect("connect")
}

pub async fn connect_with(
    connector: &MemoryConnector,
    urls: &[&str],
    options: ConnectionOptions,
    handlers: EventHandlers,
) -> relay_link::Result<Connection> {
    init_logging();
    Connection::builder()
        .urls(urls.iter().copied())
        .options(options)
        .timeouts(RelayLinkTimeouts::fast())
        .event_handlers(handlers)
        .connector(connector.clone())
        .rng_seed(42)
        .connect()
        .await
}

/// Completion callback that records every outcome it receives.
pub fn recorder() -> (CompletionCallback, Arc<Mutex<Vec<relay_link::Result<Completion>>>>) {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    let callback: CompletionCallback = Arc::new(move |outcome| sink.lock().push(outcome));
    (callback, outcomes)
}

/// Subscription listener that records everything.
#[derive(Default)]
pub struct Collector {
    pub messages: Mutex<Vec<Message>>,
    pub subscribed: Mutex<Vec<u64>>,
    pub errors: Mutex<Vec<(u64, RelayLinkError)>>,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }
}

impl SubscriptionListener for Collector {
    fn on_messages(&self, _subscription_id: u64, messages: &[Message]) {
        self.messages.lock().extend_from_slice(messages);
    }

    fn on_subscribe(&self, subscription_id: u64) {
        self.subscribed.lock().push(subscription_id);
    }

    fn on_error(&self, subscription_id: u64, error: &RelayLinkError) {
        self.errors.lock().push((subscription_id, error.clone()));
    }
}

/// Connection-level events, recorded.
#[derive(Default)]
pub struct Events {
    pub connects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub disconnects: Mutex<Vec<DisconnectReason>>,
    pub errors: Mutex<Vec<ConnectionError>>,
    pub states: Mutex<Vec<(ConnectionState, ConnectionState)>>,
}

impl Events {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handlers(self: &Arc<Self>) -> EventHandlers {
        let (connect, reconnect, disconnect, error, state) =
            (self.clone(), self.clone(), self.clone(), self.clone(), self.clone());
        EventHandlers::new()
            .on_connect(move || {
                connect.connects.fetch_add(1, Ordering::SeqCst);
            })
            .on_reconnect(move || {
                reconnect.reconnects.fetch_add(1, Ordering::SeqCst);
            })
            .on_disconnect(move |reason| disconnect.disconnects.lock().push(reason))
            .on_error(move |err| error.errors.lock().push(err))
            .on_state_change(move |old, new| state.states.lock().push((old, new)))
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}
