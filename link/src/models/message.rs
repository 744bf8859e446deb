use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use super::envelope::Envelope;
use crate::error::Result;

/// A published or delivered message.
///
/// The payload is opaque to the connection engine: it travels as the `body`
/// of the envelope. Deliveries additionally carry the metadata the server
/// attached (sequence number, subscription, reply-to address, request id,
/// store id and delivery count) and keep the raw envelope they arrived in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    body: JsonValue,
    seq: Option<u64>,
    subscription_id: Option<u64>,
    reply_to: Option<String>,
    request_id: Option<String>,
    store_id: Option<String>,
    delivery_count: Option<u32>,
    envelope: Option<Envelope>,
}

impl Message {
    /// Create an outbound message from a JSON payload.
    pub fn new(body: impl Into<JsonValue>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Create an outbound message by serializing `payload`.
    pub fn from_payload<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(payload)?))
    }

    /// Build a delivered message from its inbound envelope.
    pub(crate) fn from_envelope(envelope: Envelope) -> Self {
        Self {
            body: envelope.body.clone().unwrap_or(JsonValue::Null),
            seq: envelope.seq,
            subscription_id: envelope.subscription_id(),
            reply_to: envelope.reply_to.clone(),
            request_id: envelope.req.clone(),
            store_id: envelope.sid.clone(),
            delivery_count: envelope.cnt,
            envelope: Some(envelope),
        }
    }

    pub fn body(&self) -> &JsonValue {
        &self.body
    }

    pub fn into_body(self) -> JsonValue {
        self.body
    }

    /// Deserialize the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn subscription_id(&self) -> Option<u64> {
        self.subscription_id
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn store_id(&self) -> Option<&str> {
        self.store_id.as_deref()
    }

    pub fn delivery_count(&self) -> Option<u32> {
        self.delivery_count
    }

    /// Whether this delivery can be answered with `send_reply`.
    pub fn is_request(&self) -> bool {
        self.reply_to.is_some()
    }

    /// The raw envelope this message was delivered in, if it was received.
    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }
}

impl From<JsonValue> for Message {
    fn from(body: JsonValue) -> Self {
        Message::new(body)
    }
}
