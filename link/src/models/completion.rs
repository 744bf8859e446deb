use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::message::Message;
use crate::error::Result;

/// Terminal success payload of a tracked operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// A publish was acknowledged (or, without QoS, written to the transport).
    Published(Message),
    /// The reply to a `send_request`.
    Reply(Message),
    /// A `send_reply` was acknowledged.
    ReplySent(Message),
    /// Response to a key-value operation. `value` is set for gets of
    /// existing keys.
    Map {
        map: String,
        key: Option<String>,
        value: Option<JsonValue>,
    },
}

/// Callback invoked exactly once with the terminal outcome of an operation.
pub type CompletionCallback = Arc<dyn Fn(Result<Completion>) + Send + Sync>;

/// Wrap a closure as a [`CompletionCallback`].
///
/// # Example
///
/// ```rust
/// use relay_link::on_complete;
///
/// let callback = on_complete(|outcome| match outcome {
///     Ok(done) => println!("done: {:?}", done),
///     Err(e) => eprintln!("failed: {}", e),
/// });
/// ```
pub fn on_complete(f: impl Fn(Result<Completion>) + Send + Sync + 'static) -> CompletionCallback {
    Arc::new(f)
}
