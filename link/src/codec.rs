//! Protocol codec.
//!
//! Maps typed operations to and from the wire envelope. JSON syntax itself is
//! delegated to `serde_json`; this module only decides which fields each
//! operation carries.

use serde_json::Value as JsonValue;

use crate::{
    error::{RelayLinkError, Result},
    models::{op, AckMode, ConnectionOptions, Destination, Envelope},
};

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encode an envelope to its wire text.
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| {
        RelayLinkError::SerializationError(format!("Failed to encode op {}: {}", envelope.op, e))
    })
}

/// Decode wire text into an envelope.
pub fn decode(text: &str) -> Result<Envelope> {
    serde_json::from_str(text)
        .map_err(|e| RelayLinkError::SerializationError(format!("Failed to decode envelope: {}", e)))
}

/// LOGIN. `reconnect_token` is present when resuming a previous session.
pub fn login(
    options: &ConnectionOptions,
    client_id: Option<&str>,
    reconnect_token: Option<&str>,
) -> Envelope {
    let extra = options
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
        .collect();

    Envelope {
        client_id: client_id.map(str::to_string),
        id_token: reconnect_token.map(str::to_string),
        username: options.username.clone(),
        password: options.password.clone(),
        qos: Some(options.qos),
        max_pending_acks: options.max_pending_acks,
        protocol: Some(PROTOCOL_VERSION),
        extra,
        ..Envelope::new(op::LOGIN)
    }
}

/// SUBSCRIBE. A non-zero `last_seq` asks the server to resume after it.
pub fn subscribe(
    id: u64,
    matcher: Option<&str>,
    durable: Option<&str>,
    ack: AckMode,
    last_seq: u64,
) -> Envelope {
    Envelope {
        id: Some(id),
        matcher: matcher.map(str::to_string),
        durable: durable.map(str::to_string),
        ack: Some(ack),
        seq: (last_seq > 0).then_some(last_seq),
        ..Envelope::new(op::SUBSCRIBE)
    }
}

/// UNSUBSCRIBE. `delete` also drops durable state on the server.
pub fn unsubscribe(id: u64, delete: bool) -> Envelope {
    Envelope {
        id: Some(id),
        del: delete.then_some(true),
        ..Envelope::new(op::UNSUBSCRIBE)
    }
}

/// MESSAGE (publish), or any other body-carrying op such as a request.
pub fn message(op_code: u16, body: &JsonValue, seq: Option<u64>) -> Envelope {
    Envelope {
        body: Some(body.clone()),
        seq,
        ..Envelope::new(op_code)
    }
}

/// Reply addressed to the reply-to of a received request.
pub fn reply(
    op_code: u16,
    reply_to: &str,
    request_id: Option<&str>,
    body: &JsonValue,
    seq: Option<u64>,
) -> Envelope {
    Envelope {
        to: Some(Destination::Address(reply_to.to_string())),
        req: request_id.map(str::to_string),
        body: Some(body.clone()),
        seq,
        ..Envelope::new(op_code)
    }
}

/// ACK of one delivery, or of everything up to `seq` on a subscription.
pub fn ack(seq: u64, subscription_id: Option<u64>) -> Envelope {
    Envelope {
        seq: Some(seq),
        id: subscription_id,
        ..Envelope::new(op::ACK)
    }
}

/// MAP_SET / MAP_GET / MAP_REMOVE / MAP_DESTROY.
pub fn map_op(
    op_code: u16,
    map: &str,
    key: Option<&str>,
    value: Option<&JsonValue>,
    seq: Option<u64>,
) -> Envelope {
    Envelope {
        map: Some(map.to_string()),
        key: key.map(str::to_string),
        value: value.cloned(),
        seq,
        ..Envelope::new(op_code)
    }
}

pub fn disconnect() -> Envelope {
    Envelope::new(op::DISCONNECT)
}
