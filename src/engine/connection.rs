//! Connection state machine and reconnect policy

use crate::config::ReconnectConfig;
use crate::transport::OpenPorts;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Bounded retry with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Tracks connection state and consecutive failures
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    policy: ReconnectPolicy,
    failures: u32,
    ports: Option<OpenPorts>,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            failures: 0,
            ports: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn ports(&self) -> Option<&OpenPorts> {
        self.ports.as_ref()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn mark_connected(&mut self, ports: OpenPorts) {
        self.state = ConnectionState::Connected;
        self.failures = 0;
        self.ports = Some(ports);
    }

    /// Record a failed open or send
    ///
    /// Returns the delay before the next attempt, or `None` once the retry
    /// budget is spent.
    pub fn mark_failed(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        self.ports = None;
        self.failures += 1;
        (self.failures <= self.policy.max_retries).then_some(self.policy.retry_delay)
    }

    /// Deliberate disconnect; no retry follows
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.ports = None;
        self.failures = 0;
    }

    /// Forget earlier failures before an explicit connect
    pub fn reset_failures(&mut self) {
        self.failures = 0;
    }
}
