use serde::{Deserialize, Serialize};

/// Core op codes understood by every protocol revision.
pub mod op {
    pub const HEARTBEAT: u16 = 0;
    pub const LOGIN: u16 = 1;
    pub const WELCOME: u16 = 2;
    pub const SUBSCRIBE: u16 = 3;
    pub const SUBSCRIBED: u16 = 4;
    pub const UNSUBSCRIBE: u16 = 5;
    pub const UNSUBSCRIBED: u16 = 6;
    pub const EVENT: u16 = 7;
    pub const MESSAGE: u16 = 8;
    pub const ACK: u16 = 9;
    pub const ERROR: u16 = 10;
    pub const DISCONNECT: u16 = 11;
    pub const GOODBYE: u16 = 12;
    pub const MAP_SET: u16 = 20;
    pub const MAP_GET: u16 = 22;
    pub const MAP_REMOVE: u16 = 24;
    pub const MAP_RESPONSE: u16 = 26;
}

/// Op codes introduced by later protocol revisions.
///
/// They are configuration rather than constants because their availability
/// depends on the protocol version the server negotiates in WELCOME.
/// Operations that use them fail with
/// [`NotSupportedByServer`](crate::RelayLinkError::NotSupportedByServer)
/// while the negotiated version is below `min_protocol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedOpCodes {
    /// Outbound request expecting a reply.
    #[serde(default = "default_request")]
    pub request: u16,
    /// Outbound reply to a received request.
    #[serde(default = "default_reply")]
    pub reply: u16,
    /// Inbound reply routed to a pending request.
    #[serde(default = "default_request_reply")]
    pub request_reply: u16,
    /// Destroy a whole key-value map.
    #[serde(default = "default_map_destroy")]
    pub map_destroy: u16,
    /// Lowest negotiated protocol version that supports the codes above.
    #[serde(default = "default_min_protocol")]
    pub min_protocol: u32,
}

fn default_request() -> u16 {
    13
}

fn default_reply() -> u16 {
    14
}

fn default_request_reply() -> u16 {
    15
}

fn default_map_destroy() -> u16 {
    28
}

fn default_min_protocol() -> u32 {
    1
}

impl Default for ExtendedOpCodes {
    fn default() -> Self {
        Self {
            request: default_request(),
            reply: default_reply(),
            request_reply: default_request_reply(),
            map_destroy: default_map_destroy(),
            min_protocol: default_min_protocol(),
        }
    }
}

impl ExtendedOpCodes {
    /// Whether a server speaking `protocol` understands the extended codes.
    pub fn supported_by(&self, protocol: u32) -> bool {
        protocol >= self.min_protocol
    }
}
