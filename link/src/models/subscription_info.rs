//! Subscription metadata exposed to callers.
//!
//! [`SubscriptionInfo`] provides a read-only snapshot of a registered
//! subscription's state, for debugging and tests.

use serde::{Deserialize, Serialize};

use super::subscription_options::AckMode;

/// Read-only snapshot of a registered subscription.
///
/// Returned by [`Connection::subscriptions()`](crate::Connection::subscriptions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Client-scoped subscription id.
    pub id: u64,
    /// Content matcher, if any.
    pub matcher: Option<String>,
    /// Durable name, if the subscription is durable.
    pub durable: Option<String>,
    pub ack_mode: AckMode,
    /// Highest acknowledged sequence number (0 when nothing has been seen).
    pub last_seq: u64,
    /// `true` while the server has not confirmed the subscription.
    pub pending: bool,
    /// Timestamp (millis since Unix epoch) of the last delivery,
    /// or `None` if nothing has been delivered yet.
    pub last_event_time_ms: Option<u64>,
    /// Timestamp (millis since Unix epoch) when the subscription was created.
    pub created_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_info_serialize_roundtrip() {
        let info = SubscriptionInfo {
            id: 7,
            matcher: Some("acct > 10".to_string()),
            durable: Some("billing".to_string()),
            ack_mode: AckMode::Client,
            last_seq: 42,
            pending: false,
            last_event_time_ms: Some(1700000000000),
            created_at_ms: 1700000000000,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"ack_mode\":\"client\""));
        let deserialized: SubscriptionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, info);
    }
}
