use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use parley_protocol::RestrictionOverrides;

/// The closed set of agent kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Tutor,
    Coach,
    Evaluator,
    Thought,
}

/// How a session's events reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransport {
    /// The duplex connection, routed by conversation id.
    Shared,
    /// A dedicated server-sent event stream per session.
    PushStream,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::Tutor,
        AgentType::Coach,
        AgentType::Evaluator,
        AgentType::Thought,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Tutor => "tutor",
            AgentType::Coach => "coach",
            AgentType::Evaluator => "evaluator",
            AgentType::Thought => "thought",
        }
    }

    pub fn transport(&self) -> SessionTransport {
        match self {
            AgentType::Thought => SessionTransport::Shared,
            AgentType::Tutor | AgentType::Coach | AgentType::Evaluator => {
                SessionTransport::PushStream
            }
        }
    }

    pub fn default_policy(&self) -> RestrictionPolicy {
        match self {
            AgentType::Tutor | AgentType::Coach => RestrictionPolicy::PERMISSIVE,
            AgentType::Evaluator => RestrictionPolicy {
                can_switch_agents: false,
                can_access_conversations: false,
                can_type_free_text: true,
                can_end_early: false,
            },
            AgentType::Thought => RestrictionPolicy {
                can_type_free_text: false,
                ..RestrictionPolicy::PERMISSIVE
            },
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}

/// Capability flags for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionPolicy {
    pub can_switch_agents: bool,
    pub can_access_conversations: bool,
    pub can_type_free_text: bool,
    pub can_end_early: bool,
}

impl RestrictionPolicy {
    /// What applies when no agent is active.
    pub const PERMISSIVE: RestrictionPolicy = RestrictionPolicy {
        can_switch_agents: true,
        can_access_conversations: true,
        can_type_free_text: true,
        can_end_early: true,
    };

    pub fn with_overrides(&self, overrides: &RestrictionOverrides) -> Self {
        Self {
            can_switch_agents: overrides
                .can_switch_agents
                .unwrap_or(self.can_switch_agents),
            can_access_conversations: overrides
                .can_access_conversations
                .unwrap_or(self.can_access_conversations),
            can_type_free_text: overrides
                .can_type_free_text
                .unwrap_or(self.can_type_free_text),
            can_end_early: overrides.can_end_early.unwrap_or(self.can_end_early),
        }
    }
}

impl Default for RestrictionPolicy {
    fn default() -> Self {
        Self::PERMISSIVE
    }
}

/// One conversational participant.
///
/// The effective policy is the type's default with server overrides layered on
/// top. Only the orchestrator mutates it.
#[derive(Debug, Clone)]
pub struct Agent {
    id: String,
    agent_type: AgentType,
    overrides: RestrictionOverrides,
}

impl Agent {
    pub(crate) fn new(id: String, agent_type: AgentType) -> Self {
        Self {
            id,
            agent_type,
            overrides: RestrictionOverrides::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    pub fn policy(&self) -> RestrictionPolicy {
        self.agent_type.default_policy().with_overrides(&self.overrides)
    }

    pub(crate) fn apply_overrides(&mut self, overrides: &RestrictionOverrides) {
        self.overrides.merge(overrides);
    }

    pub(crate) fn reset_overrides(&mut self) {
        self.overrides = RestrictionOverrides::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Background,
    Completed,
    Terminated,
}

/// One running execution of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub conversation_id: Option<String>,
    pub status: SessionStatus,
}

impl Session {
    /// Still executing (active or background).
    pub fn is_live(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Background)
    }
}

/// Read-only view of an agent for consumers.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub agent_type: AgentType,
    pub policy: RestrictionPolicy,
    pub active: bool,
    pub session: Option<Session>,
    pub stream_open: bool,
    pub buffered: usize,
}
