use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connection::Backoff;

// =============================================================================
// Unified config (figment-deserialized from defaults / parley.toml / env vars)
// =============================================================================
//
//   parley.toml:     [connection]
//                    max_reconnect_attempts = 8
//
//   env var:         PARLEY_CONNECTION__MAX_RECONNECT_ATTEMPTS=8
//
//   (double underscore = nesting, single underscore stays within field names)

pub const CONFIG_FILE_NAME: &str = "parley.toml";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub agents: AgentsFileConfig,
    #[serde(default)]
    pub events: EventsFileConfig,
}

/// REST collaborator (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent to the collaborator and push streams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
        }
    }
}

/// Duplex connection tunables (lives under `[connection]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Used until the server advertises its own heartbeat interval.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

/// Orchestrator tunables (lives under `[agents]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentsFileConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_max_reconnect_attempts")]
    pub stream_max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub stream_reconnect_base_delay_ms: u64,
}

impl Default for AgentsFileConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            stream_max_reconnect_attempts: default_max_reconnect_attempts(),
            stream_reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventsFileConfig {
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for EventsFileConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_keepalive_interval_secs() -> u64 {
    30
}
fn default_inbound_capacity() -> usize {
    256
}
fn default_buffer_capacity() -> usize {
    crate::agents::DEFAULT_BUFFER_CAPACITY
}
fn default_bus_capacity() -> usize {
    1024
}

/// Build a figment that layers: defaults → parley.toml → PARLEY_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("PARLEY_").split("__"))
}

/// `--config-dir` if given, otherwise the platform config directory.
pub fn config_dir(custom: Option<PathBuf>) -> Result<PathBuf> {
    match custom {
        Some(dir) => Ok(dir),
        None => Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("parley")),
    }
}

/// Resolved duplex connection settings (runtime view).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub backoff: Backoff,
    pub keepalive_interval: Duration,
    pub inbound_capacity: usize,
}

impl ConnectionConfig {
    pub fn from_file(fc: &ConnectionFileConfig) -> Self {
        Self {
            backoff: Backoff::new(
                Duration::from_millis(fc.reconnect_base_delay_ms),
                Duration::from_millis(fc.reconnect_max_delay_ms),
                fc.max_reconnect_attempts,
            ),
            keepalive_interval: Duration::from_secs(fc.keepalive_interval_secs.max(1)),
            inbound_capacity: fc.inbound_capacity,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_file(&ConnectionFileConfig::default())
    }
}

/// Resolved orchestrator settings (runtime view).
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub buffer_capacity: usize,
    pub stream_backoff: Backoff,
}

impl OrchestratorConfig {
    /// Push streams share the connection's delay ceiling.
    pub fn from_file(agents: &AgentsFileConfig, connection: &ConnectionFileConfig) -> Self {
        Self {
            buffer_capacity: agents.buffer_capacity,
            stream_backoff: Backoff::new(
                Duration::from_millis(agents.stream_reconnect_base_delay_ms),
                Duration::from_millis(connection.reconnect_max_delay_ms),
                agents.stream_max_reconnect_attempts,
            ),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_file(&AgentsFileConfig::default(), &ConnectionFileConfig::default())
    }
}

/// Everything [`RealtimeClient`](crate::RealtimeClient) needs.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub connection: ConnectionConfig,
    pub orchestrator: OrchestratorConfig,
    pub bus_capacity: usize,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let bus_capacity =
            replay_safe_bus_capacity(fc.events.bus_capacity, fc.agents.buffer_capacity);
        if bus_capacity != fc.events.bus_capacity {
            warn!(
                requested = fc.events.bus_capacity,
                buffer_capacity = fc.agents.buffer_capacity,
                bus_capacity,
                "events.bus_capacity raised to hold a full replay"
            );
        }
        Self {
            base_url: fc.server.base_url.clone(),
            auth_token: fc.server.auth_token.clone(),
            connection: ConnectionConfig::from_file(&fc.connection),
            orchestrator: OrchestratorConfig::from_file(&fc.agents, &fc.connection),
            bus_capacity,
        }
    }
}

/// A switch-back publishes the whole background buffer, then
/// `ReplayCompleted` and `AgentChanged`, in one burst. A subscriber that was
/// caught up must not lag on it.
pub fn replay_safe_bus_capacity(requested: usize, buffer_capacity: usize) -> usize {
    requested.max(buffer_capacity.saturating_add(2))
}
