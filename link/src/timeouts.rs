//! Timeout configuration for relay-link operations.
//!
//! The transport connect timeout is part of
//! [`ConnectionOptions`](crate::ConnectionOptions) because servers commonly
//! hand it out with the rest of the connection configuration. Everything
//! else that bounds a wait inside the engine lives here.

use std::future::Future;
use std::time::Duration;

/// Timeout configuration for relay-link operations.
///
/// # Examples
///
/// ```rust
/// use relay_link::RelayLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = RelayLinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = RelayLinkTimeouts::builder()
///     .login_timeout(Duration::from_secs(30))
///     .request_timeout_secs(120)
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = RelayLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLinkTimeouts {
    /// Time allowed between sending LOGIN and receiving WELCOME.
    /// An attempt that exceeds it counts as a failed connection attempt.
    /// Default: 10 seconds
    pub login_timeout: Duration,

    /// Timeout for writing one frame to the transport.
    /// Default: 10 seconds
    pub send_timeout: Duration,

    /// Reply window used by `send_request_default`.
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// How long a graceful disconnect waits for the writer to flush and
    /// close the transport before the session is force-closed.
    /// Default: 5 seconds
    pub disconnect_grace: Duration,
}

impl Default for RelayLinkTimeouts {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(5),
        }
    }
}

impl RelayLinkTimeouts {
    pub fn builder() -> RelayLinkTimeoutsBuilder {
        RelayLinkTimeoutsBuilder::new()
    }

    /// Create timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            login_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            disconnect_grace: Duration::from_secs(1),
        }
    }

    /// Create timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            login_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            disconnect_grace: Duration::from_secs(15),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365) // > 1 year
    }
}

/// Run `fut` under `limit`, or unbounded when `limit` means "no timeout".
pub(crate) async fn within<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    if RelayLinkTimeouts::is_no_timeout(limit) {
        Some(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

/// Builder for creating custom [`RelayLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct RelayLinkTimeoutsBuilder {
    timeouts: RelayLinkTimeouts,
}

impl RelayLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: RelayLinkTimeouts::default(),
        }
    }

    /// Set the LOGIN → WELCOME handshake timeout.
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.login_timeout = timeout;
        self
    }

    pub fn login_timeout_secs(self, secs: u64) -> Self {
        self.login_timeout(Duration::from_secs(secs))
    }

    /// Set the per-frame write timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.send_timeout = timeout;
        self
    }

    pub fn send_timeout_secs(self, secs: u64) -> Self {
        self.send_timeout(Duration::from_secs(secs))
    }

    /// Set the default request/reply window.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    pub fn request_timeout_secs(self, secs: u64) -> Self {
        self.request_timeout(Duration::from_secs(secs))
    }

    /// Set the graceful-disconnect grace period.
    /// Set to 0 to wait for the writer indefinitely.
    pub fn disconnect_grace(mut self, timeout: Duration) -> Self {
        self.timeouts.disconnect_grace = timeout;
        self
    }

    pub fn disconnect_grace_secs(self, secs: u64) -> Self {
        self.disconnect_grace(Duration::from_secs(secs))
    }

    pub fn build(self) -> RelayLinkTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = RelayLinkTimeouts::default();
        assert_eq!(timeouts.login_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.request_timeout, Duration::from_secs(30));
        assert_eq!(timeouts.disconnect_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let timeouts = RelayLinkTimeouts::builder()
            .login_timeout_secs(60)
            .request_timeout(Duration::from_millis(250))
            .disconnect_grace_secs(0)
            .build();

        assert_eq!(timeouts.login_timeout, Duration::from_secs(60));
        assert_eq!(timeouts.request_timeout, Duration::from_millis(250));
        assert!(timeouts.disconnect_grace.is_zero());
        assert_eq!(timeouts.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_presets() {
        assert!(RelayLinkTimeouts::fast().login_timeout <= Duration::from_secs(5));
        assert!(RelayLinkTimeouts::relaxed().login_timeout >= Duration::from_secs(30));
    }

    #[test]
    fn test_is_no_timeout() {
        assert!(RelayLinkTimeouts::is_no_timeout(Duration::ZERO));
        assert!(!RelayLinkTimeouts::is_no_timeout(Duration::from_secs(1)));
        assert!(!RelayLinkTimeouts::is_no_timeout(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_within_respects_limit() {
        let done = within(Duration::from_millis(10), std::future::pending::<()>()).await;
        assert!(done.is_none());

        let done = within(Duration::ZERO, async { 7 }).await;
        assert_eq!(done, Some(7));
    }
}
