//! The REST collaborator that creates agents and sessions.
//!
//! The orchestrator only sees the [`AgentBackend`] trait; [`HttpAgentBackend`]
//! is the reqwest implementation.

mod http;

pub use http::HttpAgentBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_protocol::{RestrictionOverrides, WidgetResponse};

use crate::agents::AgentType;
use crate::connection::ConnectTarget;
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
}

/// A session as the collaborator reports it.
///
/// Push-stream agents get a `stream_url`; shared-connection agents get a
/// `connect` target for the duplex connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<ConnectTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<RestrictionOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Create (or reopen) a conversation on the duplex connection.
    async fn open_conversation(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<ConnectTarget, BackendError>;

    async fn create_agent(&self, agent_type: AgentType) -> Result<AgentRecord, BackendError>;

    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentRecord, BackendError>;

    async fn create_session(
        &self,
        agent_id: &str,
        options: &SessionOptions,
    ) -> Result<SessionRecord, BackendError>;

    /// The agent's running session, if it has one.
    async fn fetch_running_session(
        &self,
        agent_id: &str,
    ) -> Result<Option<SessionRecord>, BackendError>;

    async fn terminate_session(
        &self,
        session_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BackendError>;

    async fn submit_response(
        &self,
        session_id: &str,
        response: &WidgetResponse,
    ) -> Result<(), BackendError>;

    async fn cancel_request(&self, session_id: &str) -> Result<(), BackendError>;
}
