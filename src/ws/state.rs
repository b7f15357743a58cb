//! Connection lifecycle state owned by the connection manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal unless an explicit `connect()` is issued
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Observable snapshot of the connection. Mutated only by the connection
/// manager; callers read copies.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub url: String,
    pub session_id: Option<String>,
    pub access_token: Option<String>,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
}

impl ConnectionInfo {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            url: String::new(),
            session_id: None,
            access_token: None,
            last_ping: None,
            last_pong: None,
            reconnect_attempts: 0,
            max_reconnect_attempts,
        }
    }
}
