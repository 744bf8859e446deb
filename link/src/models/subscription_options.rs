use serde::{Deserialize, Serialize};

/// How deliveries on a subscription are acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// The client acknowledges every delivery right after the listener runs.
    #[default]
    Auto,
    /// The caller acknowledges explicitly with `acknowledge`/`acknowledge_all`.
    Client,
    /// Nothing is acknowledged.
    None,
}

/// Subscription options.
///
/// # Example
///
/// ```rust
/// use relay_link::{AckMode, SubscriptionOptions};
///
/// let options = SubscriptionOptions::default()
///     .with_ack_mode(AckMode::Client)
///     .with_from_seq(120);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Acknowledgement mode. Default: `Auto`.
    #[serde(default)]
    pub ack_mode: AckMode,

    /// Deliveries with a sequence number at or below this value are skipped.
    /// Used to resume a durable subscription from a known position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_seq: Option<u64>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    pub fn with_from_seq(mut self, seq: u64) -> Self {
        self.from_seq = Some(seq);
        self
    }
}
