//! Per-subscription callbacks.

use std::fmt;
use std::sync::Arc;

use crate::{error::RelayLinkError, models::Message};

/// Receives deliveries and lifecycle notifications for one subscription.
///
/// Only `on_messages` is required. The registry holds listeners by shared
/// reference and never constructs or destroys them.
pub trait SubscriptionListener: Send + Sync {
    /// Deliveries for `subscription_id`, in server order.
    fn on_messages(&self, subscription_id: u64, messages: &[Message]);

    /// The server confirmed the subscription.
    fn on_subscribe(&self, _subscription_id: u64) {}

    /// The server rejected the subscription or reported a delivery error.
    fn on_error(&self, _subscription_id: u64, _error: &RelayLinkError) {}
}

pub type OnMessagesCallback = Arc<dyn Fn(u64, &[Message]) + Send + Sync>;
pub type OnSubscribeCallback = Arc<dyn Fn(u64) + Send + Sync>;
pub type OnSubscriptionErrorCallback = Arc<dyn Fn(u64, &RelayLinkError) + Send + Sync>;

/// Closure-based [`SubscriptionListener`].
///
/// # Example
///
/// ```rust
/// use relay_link::SubscriptionHandlers;
///
/// let listener = SubscriptionHandlers::new()
///     .on_messages(|id, msgs| println!("sub {} got {} message(s)", id, msgs.len()))
///     .on_error(|id, err| eprintln!("sub {} failed: {}", id, err))
///     .into_listener();
/// ```
#[derive(Clone, Default)]
pub struct SubscriptionHandlers {
    on_messages: Option<OnMessagesCallback>,
    on_subscribe: Option<OnSubscribeCallback>,
    on_error: Option<OnSubscriptionErrorCallback>,
}

impl fmt::Debug for SubscriptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandlers")
            .field("on_messages", &self.on_messages.is_some())
            .field("on_subscribe", &self.on_subscribe.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl SubscriptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_messages(mut self, f: impl Fn(u64, &[Message]) + Send + Sync + 'static) -> Self {
        self.on_messages = Some(Arc::new(f));
        self
    }

    pub fn on_subscribe(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_subscribe = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(u64, &RelayLinkError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Box the handlers for [`Connection::subscribe`](crate::Connection::subscribe).
    pub fn into_listener(self) -> Arc<dyn SubscriptionListener> {
        Arc::new(self)
    }
}

impl SubscriptionListener for SubscriptionHandlers {
    fn on_messages(&self, subscription_id: u64, messages: &[Message]) {
        if let Some(cb) = &self.on_messages {
            cb(subscription_id, messages);
        }
    }

    fn on_subscribe(&self, subscription_id: u64) {
        if let Some(cb) = &self.on_subscribe {
            cb(subscription_id);
        }
    }

    fn on_error(&self, subscription_id: u64, error: &RelayLinkError) {
        if let Some(cb) = &self.on_error {
            cb(subscription_id, error);
        }
    }
}
