use serde::{Deserialize, Serialize};

/// Session parameters negotiated in the most recent WELCOME.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Client identifier assigned by the server on first login.
    pub client_id: Option<String>,
    /// Opaque token presented on reconnect to resume this session.
    pub reconnect_token: Option<String>,
    /// Negotiated protocol version.
    pub protocol: u32,
    /// Whether sequence-numbered, acknowledged delivery is in effect.
    pub qos: bool,
    /// Maximum encoded envelope size in bytes. 0 = unlimited.
    pub max_size: u64,
    /// Whether the last WELCOME resumed the previous session.
    pub resumed: bool,
}

impl SessionInfo {
    /// Whether an encoded envelope of `len` bytes fits the server limit.
    pub fn fits(&self, len: usize) -> bool {
        self.max_size == 0 || (len as u64) <= self.max_size
    }
}
