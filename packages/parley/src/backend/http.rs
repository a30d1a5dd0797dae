use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use parley_protocol::WidgetResponse;

use super::{AgentBackend, AgentRecord, SessionOptions, SessionRecord};
use crate::agents::AgentType;
use crate::connection::ConnectTarget;
use crate::error::BackendError;

/// reqwest client for the collaborator's REST API.
#[derive(Debug, Clone)]
pub struct HttpAgentBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpAgentBackend {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BackendError::from_reqwest)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a server-relative URL against the base URL.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            url.to_string()
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn resolve_session(&self, mut record: SessionRecord) -> SessionRecord {
        record.stream_url = record.stream_url.map(|url| self.absolute(&url));
        if let Some(target) = record.connect.as_mut() {
            target.url = self.absolute(&target.url);
        }
        record
    }
}

async fn send(req: RequestBuilder) -> Result<Response, BackendError> {
    let resp = req.send().await.map_err(BackendError::from_reqwest)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, BackendError> {
    send(req)
        .await?
        .json::<T>()
        .await
        .map_err(|e| BackendError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn open_conversation(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<ConnectTarget, BackendError> {
        let mut target: ConnectTarget = send_json(
            self.request(Method::POST, "/api/conversations")
                .json(&json!({ "conversationId": conversation_id })),
        )
        .await?;
        target.url = self.absolute(&target.url);
        debug!(conversation_id = %target.conversation_id, "conversation opened");
        Ok(target)
    }

    async fn create_agent(&self, agent_type: AgentType) -> Result<AgentRecord, BackendError> {
        send_json(
            self.request(Method::POST, "/api/agents")
                .json(&json!({ "type": agent_type })),
        )
        .await
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentRecord, BackendError> {
        send_json(self.request(Method::GET, &format!("/api/agents/{agent_id}"))).await
    }

    async fn create_session(
        &self,
        agent_id: &str,
        options: &SessionOptions,
    ) -> Result<SessionRecord, BackendError> {
        let record: SessionRecord = send_json(
            self.request(Method::POST, &format!("/api/agents/{agent_id}/sessions"))
                .json(options),
        )
        .await?;
        Ok(self.resolve_session(record))
    }

    async fn fetch_running_session(
        &self,
        agent_id: &str,
    ) -> Result<Option<SessionRecord>, BackendError> {
        let req = self.request(
            Method::GET,
            &format!("/api/agents/{agent_id}/sessions/current"),
        );
        match send_json::<SessionRecord>(req).await {
            Ok(record) => Ok(Some(self.resolve_session(record))),
            Err(BackendError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn terminate_session(
        &self,
        session_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BackendError> {
        send(
            self.request(Method::POST, &format!("/api/sessions/{session_id}/terminate"))
                .json(&json!({ "reason": reason })),
        )
        .await?;
        Ok(())
    }

    async fn submit_response(
        &self,
        session_id: &str,
        response: &WidgetResponse,
    ) -> Result<(), BackendError> {
        send(
            self.request(Method::POST, &format!("/api/sessions/{session_id}/responses"))
                .json(response),
        )
        .await?;
        Ok(())
    }

    async fn cancel_request(&self, session_id: &str) -> Result<(), BackendError> {
        send(self.request(Method::POST, &format!("/api/sessions/{session_id}/cancel"))).await?;
        Ok(())
    }
}
