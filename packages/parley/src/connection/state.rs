use serde::{Deserialize, Serialize};

use parley_protocol::ModelInfo;

/// Lifecycle of the duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// What the collaborator REST call hands back for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTarget {
    pub url: String,
    pub conversation_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub conversation_id: Option<String>,
    /// Assigned by the server in `system.connection.established`.
    pub server_session_id: Option<String>,
    pub capabilities: Vec<String>,
    pub models: Vec<ModelInfo>,
    pub default_model: Option<String>,
    /// Round trip of the last answered keepalive ping.
    pub latency_ms: Option<u64>,
    pub keepalive_interval_ms: u64,
    pub last_close_code: Option<u16>,
}
