//! Data models for the relay-link client library.
//!
//! Defines the wire envelope, message, and configuration structures.

pub mod completion;
pub mod connection_options;
pub mod envelope;
pub mod message;
pub mod op_code;
pub mod session_info;
pub mod subscription_info;
pub mod subscription_options;
pub mod utils;


pub use completion::{on_complete, Completion, CompletionCallback};
pub use connection_options::ConnectionOptions;
pub use envelope::{Destination, Envelope};
pub use message::Message;
pub use op_code::{op, ExtendedOpCodes};
pub use session_info::SessionInfo;
pub use subscription_info::SubscriptionInfo;
pub use subscription_options::{AckMode, SubscriptionOptions};
