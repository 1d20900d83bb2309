//! Health status reported by the probe

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Raw transport ready states, as reported by [`Transport::ready_state`](crate::driver::Transport::ready_state)
pub mod ready_state {
    pub const DISCONNECTED: u8 = 0;
    pub const CONNECTED: u8 = 1;
    pub const CONNECTING: u8 = 2;
    pub const DISCONNECTING: u8 = 3;
}

/// Connection state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl ConnectionStatus {
    /// Map a transport ready state; anything unknown counts as disconnected
    pub fn from_ready_state(state: u8) -> Self {
        match state {
            ready_state::CONNECTED => ConnectionStatus::Connected,
            ready_state::CONNECTING => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot produced fresh by every health probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: ConnectionStatus,
    /// Round-trip time of the ping; `None` when not connected or the ping failed
    pub ping_millis: Option<u64>,
    /// Pooled transport connections currently open
    pub active_connections: u32,
    pub registered_collections: Vec<String>,
    /// Only present when disconnected, when the ping failed, or when it was slow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Attempts made in the current (or most recent) connect cycle
    pub attempt_count: u32,
}

impl HealthStatus {
    /// Report with no usable connection
    pub fn disconnected(last_error: impl Into<String>, attempt_count: u32) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            ping_millis: None,
            active_connections: 0,
            registered_collections: Vec::new(),
            last_error: Some(last_error.into()),
            attempt_count,
        }
    }

    /// Connected with a successful, fast ping
    pub fn is_healthy(&self) -> bool {
        self.status == ConnectionStatus::Connected
            && self.ping_millis.is_some()
            && self.last_error.is_none()
    }
}

// Collections compare as a set.
impl PartialEq for HealthStatus {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.ping_millis == other.ping_millis
            && self.active_connections == other.active_connections
            && self.last_error == other.last_error
            && self.attempt_count == other.attempt_count
            && self.registered_collections.iter().collect::<BTreeSet<_>>()
                == other.registered_collections.iter().collect::<BTreeSet<_>>()
    }
}
