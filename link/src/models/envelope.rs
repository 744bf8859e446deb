use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::subscription_options::AckMode;
use super::utils::opt_string_or_number;

/// Target of an envelope's `to` field.
///
/// Inbound EVENT envelopes address a subscription id; outbound replies address
/// the opaque reply-to string captured from the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Subscription(u64),
    Address(String),
}

impl Destination {
    pub fn subscription_id(&self) -> Option<u64> {
        match self {
            Destination::Subscription(id) => Some(*id),
            Destination::Address(s) => s.parse().ok(),
        }
    }
}

/// The top-level wire object exchanged in both directions.
///
/// Field names are the literal keys of the protocol. Every field except `op`
/// is optional and omitted from the encoded text when absent. Keys this
/// version does not model are kept in `extra`, so unknown server fields
/// survive a decode/encode cycle and unknown login options can be forwarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Subscription id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<u64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<AckMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Destination>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub reply_to: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub req: Option<String>,

    /// Store message id.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub sid: Option<String>,

    /// Delivery count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnt: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Reconnect token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,

    #[serde(rename = "_qos", default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<bool>,

    #[serde(rename = "_resume", default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub del: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending_acks: Option<u32>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Envelope {
    /// An envelope carrying only the op code.
    pub fn new(op: u16) -> Self {
        Self {
            op,
            ..Default::default()
        }
    }

    /// The error code/reason pair, if the server reported one.
    pub fn error(&self) -> Option<(i64, String)> {
        self.err
            .map(|code| (code, self.reason.clone().unwrap_or_default()))
    }

    /// Subscription id this envelope is addressed to (EVENT `to`, else `id`).
    pub fn subscription_id(&self) -> Option<u64> {
        self.to
            .as_ref()
            .and_then(Destination::subscription_id)
            .or(self.id)
    }
}
