//! Connection configuration

use crate::codec::WireProfile;
use tokio::time::Duration;

/// Default UnrealCV server port
pub const DEFAULT_PORT: u16 = 9000;

/// Configuration for the engine connection
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Engine host
    pub host: String,
    /// Engine port
    pub port: u16,
    /// Timeout applied to each connect attempt
    pub connect_timeout: Duration,
    /// Connect attempts before giving up
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
    /// Time allowed for a reply to arrive
    pub command_timeout: Duration,
    /// Framing and tagging used on the socket
    pub wire: WireProfile,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(1),
            max_attempts: 30,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            command_timeout: Duration::from_secs(10),
            wire: WireProfile::default(),
        }
    }
}

impl BridgeConfig {
    /// Create config for a specific endpoint
    pub fn with_address(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `host:port` as used in log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}
