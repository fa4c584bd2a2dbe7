//! Construction-time configuration for a component session.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ComponentError, Result};

/// TCP connection timeout used when none is configured.
///
/// Without this, the OS default applies, which can be minutes for unreachable hosts.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Options for [`Component::connect`](crate::Component::connect).
///
/// Deserializable so host programs can keep them in their own config files:
///
/// ```json
/// { "address": "127.0.0.1:5347", "name": "bot.example.com", "shared_secret": "s3cr3t" }
/// ```
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Options {
    /// Server address as `host:port`.
    pub address: String,
    /// Component JID, sent as the stream `to` attribute.
    pub name: String,
    /// Secret shared with the server for the handshake digest.
    pub shared_secret: String,
    /// Log every byte read from and written to the connection.
    #[serde(default)]
    pub trace_traffic: bool,
    /// TCP keep-alive period applied right after dialing.
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Options {
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            shared_secret: shared_secret.into(),
            trace_traffic: false,
            keepalive_secs: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    pub fn trace_traffic(mut self, enabled: bool) -> Self {
        self.trace_traffic = enabled;
        self
    }

    /// Sub-second periods round up to the next whole second.
    pub fn with_keepalive(mut self, period: Duration) -> Self {
        self.keepalive_secs = Some(crate::transport::keepalive_period(period).as_secs());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reject options that cannot possibly produce a session.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(ComponentError::InvalidOptions("address is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ComponentError::InvalidOptions("component name is empty".to_string()));
        }
        if self.shared_secret.is_empty() {
            return Err(ComponentError::InvalidOptions("shared secret is empty".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ComponentError::InvalidOptions("connect timeout is zero".to_string()));
        }
        Ok(())
    }
}

// The shared secret must never reach the logs.
impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("shared_secret", &"<redacted>")
            .field("trace_traffic", &self.trace_traffic)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}
