//! `RealtimeClient`: the command surface handed to the presentation layer.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_protocol::{Envelope, MessageType, WidgetResponse};

use crate::agents::{Agent, AgentType, Orchestrator, Session, SessionTransport};
use crate::backend::{AgentBackend, HttpAgentBackend, SessionOptions};
use crate::config::ClientConfig;
use crate::connection::{self, ConnectTarget, ConnectionHandle, ConnectionStatus, Connector, WsConnector};
use crate::dispatch::Dispatcher;
use crate::error::{BackendError, OrchestratorError, TransportError};
use crate::events::{ClientEvent, EventBus};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::stream::{PushStreamOpener, SseStreamOpener};

pub struct RealtimeClient {
    connection: ConnectionHandle,
    orchestrator: Orchestrator,
    backend: Arc<dyn AgentBackend>,
    bus: EventBus,
    metrics: Arc<ClientMetrics>,
    router: JoinHandle<()>,
}

impl RealtimeClient {
    /// Production wiring: WebSocket transport, REST collaborator, SSE streams.
    /// Must be called inside a tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let backend = HttpAgentBackend::new(&config.base_url, config.auth_token.clone())
            .context("Failed to build collaborator client")?;
        let streams = SseStreamOpener::new(config.auth_token.clone())
            .context("Failed to build push stream client")?;
        Ok(Self::with_parts(
            WsConnector,
            Arc::new(backend),
            Arc::new(streams),
            config,
        ))
    }

    pub fn with_parts<C: Connector>(
        connector: C,
        backend: Arc<dyn AgentBackend>,
        streams: Arc<dyn PushStreamOpener>,
        config: &ClientConfig,
    ) -> Self {
        let bus = EventBus::new(config.bus_capacity);
        let metrics = Arc::new(ClientMetrics::new());
        let (connection, inbound) = connection::spawn(
            connector,
            config.connection.clone(),
            bus.clone(),
            metrics.clone(),
        );
        let orchestrator = Orchestrator::new(
            backend.clone(),
            streams,
            Some(connection.clone()),
            Dispatcher::new(bus.clone(), metrics.clone()),
            config.orchestrator.clone(),
            metrics.clone(),
        );
        let router = tokio::spawn(route_inbound(
            inbound,
            bus.subscribe(),
            orchestrator.clone(),
        ));

        Self {
            connection,
            orchestrator,
            backend,
            bus,
            metrics,
            router,
        }
    }

    // === Connection ===

    /// Ask the collaborator for a conversation to connect to.
    pub async fn open_conversation(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<ConnectTarget, BackendError> {
        self.backend.open_conversation(conversation_id).await
    }

    pub async fn connect(&self, target: ConnectTarget) -> Result<(), TransportError> {
        self.connection.connect(target).await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.connection.disconnect().await
    }

    /// Send one envelope on the shared connection. Returns its id.
    pub async fn send(
        &self,
        message_type: MessageType,
        payload: Value,
    ) -> Result<String, TransportError> {
        self.connection.send(message_type, payload).await
    }

    pub async fn status(&self) -> Result<ConnectionStatus, TransportError> {
        self.connection.status().await
    }

    // === Agents ===

    /// Answer a widget. Push-stream sessions take it over REST; everything
    /// else goes out as `data.response.submit` on the shared connection.
    pub async fn submit_widget_response(
        &self,
        item_id: &str,
        widget_id: &str,
        widget_type: &str,
        value: Value,
    ) -> Result<(), OrchestratorError> {
        let response = WidgetResponse {
            item_id: item_id.to_string(),
            widget_id: widget_id.to_string(),
            widget_type: widget_type.to_string(),
            value,
        };

        match self.orchestrator.active_transport().await {
            Some(SessionTransport::PushStream) => {
                self.orchestrator.submit_response(None, &response).await
            }
            Some(SessionTransport::Shared) | None => {
                let payload = encode_payload(&response)?;
                let id = self
                    .connection
                    .send(MessageType::ResponseSubmit, payload)
                    .await?;
                debug!(envelope_id = %id, item_id = %item_id, "response sent on connection");
                Ok(())
            }
        }
    }

    pub async fn switch_to_agent(&self, agent_type: AgentType) -> Result<Agent, OrchestratorError> {
        self.orchestrator.switch_to_agent(agent_type).await
    }

    pub async fn start_session(&self, options: SessionOptions) -> Result<Session, OrchestratorError> {
        self.orchestrator.start_session(options).await
    }

    pub async fn resume_session(&self, agent_id: &str) -> Result<Session, OrchestratorError> {
        self.orchestrator.resume_session(agent_id).await
    }

    pub async fn terminate_session(
        &self,
        agent_id: &str,
        reason: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.orchestrator.terminate_session(agent_id, reason).await
    }

    /// Cancel the in-flight response for `agent_id`, or the active agent's.
    pub async fn cancel_request(&self, agent_id: Option<&str>) -> Result<bool, OrchestratorError> {
        self.orchestrator.cancel_request(agent_id).await
    }

    /// Agent queries (policies, snapshots) live on the orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    // === Observation ===

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// End every push stream and close the shared connection.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        if let Err(e) = self.connection.disconnect().await {
            debug!(code = e.error_code(), "disconnect during shutdown: {}", e);
        }
        self.router.abort();
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value).map_err(|e| TransportError::Encode(e.to_string()))
}

/// Feed every envelope from the shared connection through the orchestrator,
/// and reset the orchestrator once the connection expires.
async fn route_inbound(
    mut inbound: mpsc::Receiver<Envelope>,
    mut events: broadcast::Receiver<ClientEvent>,
    orchestrator: Orchestrator,
) {
    loop {
        tokio::select! {
            envelope = inbound.recv() => match envelope {
                Some(envelope) => orchestrator.ingest_shared(envelope).await,
                None => break,
            },
            event = events.recv() => match event {
                Ok(ClientEvent::SessionExpired { reason, .. }) => orchestrator.expire(&reason).await,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "router fell behind the event bus"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("inbound router stopped");
}
