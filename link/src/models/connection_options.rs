use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::op_code::ExtendedOpCodes;

/// Connection-level options.
///
/// These options control login credentials, reconnection behaviour and the
/// transport. Options the server understands but this type does not model
/// go into `extra`; they are forwarded verbatim as LOGIN fields.
///
/// Separate from [`SubscriptionOptions`](super::SubscriptionOptions) which
/// control individual subscriptions.
///
/// # Example
///
/// ```rust
/// use relay_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_credentials("alice", "secret")
///     .with_auto_reconnect_attempts(10)
///     .with_auto_reconnect_max_delay_seconds(5)
///     .with_extra("region", "eu-west");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier to present on first login.
    /// The server assigns one when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Timeout for opening the transport to one URL.
    /// Default: 10 seconds
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Maximum number of failed connection attempts before giving up.
    /// Default: 256. Set to 0 to disable automatic reconnection.
    #[serde(default = "default_auto_reconnect_attempts")]
    pub auto_reconnect_attempts: u32,

    /// Cap on the backoff delay applied after every URL has been tried.
    /// Default: 30 seconds
    #[serde(default = "default_auto_reconnect_max_delay_seconds")]
    pub auto_reconnect_max_delay_seconds: u64,

    /// Maximum number of unacknowledged deliveries the server may have in
    /// flight for this client. Forwarded in LOGIN.
    #[serde(default)]
    pub max_pending_acks: Option<u32>,

    /// Accept any TLS certificate presented by the server.
    /// **Do not enable in production.** Default: `false`.
    #[serde(default)]
    pub trust_all_certificates: bool,

    /// Request sequence-numbered, acknowledged delivery.
    /// The server has the final word in WELCOME. Default: `true`.
    #[serde(default = "default_qos")]
    pub qos: bool,

    /// Op codes of protocol-gated operations.
    #[serde(default)]
    pub extended_op_codes: ExtendedOpCodes,

    /// Additional login fields forwarded as-is.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_auto_reconnect_attempts() -> u32 {
    256
}

fn default_auto_reconnect_max_delay_seconds() -> u64 {
    30
}

fn default_qos() -> bool {
    true
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            client_id: None,
            connect_timeout_seconds: default_connect_timeout_seconds(),
            auto_reconnect_attempts: default_auto_reconnect_attempts(),
            auto_reconnect_max_delay_seconds: default_auto_reconnect_max_delay_seconds(),
            max_pending_acks: None,
            trust_all_certificates: false,
            qos: default_qos(),
            extended_op_codes: ExtendedOpCodes::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the username and password sent in LOGIN.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_connect_timeout_seconds(mut self, secs: u64) -> Self {
        self.connect_timeout_seconds = secs;
        self
    }

    /// Set the reconnect attempt budget. 0 disables reconnection.
    pub fn with_auto_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.auto_reconnect_attempts = attempts;
        self
    }

    pub fn with_auto_reconnect_max_delay_seconds(mut self, secs: u64) -> Self {
        self.auto_reconnect_max_delay_seconds = secs;
        self
    }

    pub fn with_max_pending_acks(mut self, max: u32) -> Self {
        self.max_pending_acks = Some(max);
        self
    }

    pub fn with_trust_all_certificates(mut self, trust: bool) -> Self {
        self.trust_all_certificates = trust;
        self
    }

    pub fn with_qos(mut self, qos: bool) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_extended_op_codes(mut self, codes: ExtendedOpCodes) -> Self {
        self.extended_op_codes = codes;
        self
    }

    /// Add a pass-through login field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn auto_reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.auto_reconnect_max_delay_seconds)
    }

    pub fn auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect_attempts > 0
    }
}
