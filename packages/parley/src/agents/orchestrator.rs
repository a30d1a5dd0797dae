//! Agent Session Orchestrator.
//!
//! Owns every agent, its session, its push stream and its background buffer.
//! All of that lives in one [`Registry`] behind a single async mutex, and every
//! transition is one critical section. The lock is never held across a
//! backend or connection await; anything that was checked before such an await
//! is checked again after it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_protocol::{ConversationConfig, Envelope, MessageType, Plane, WidgetResponse};

use super::buffer::EventBuffer;
use super::routing::{Route, decide};
use super::types::{
    Agent, AgentSnapshot, AgentType, RestrictionPolicy, Session, SessionStatus, SessionTransport,
};
use crate::backend::{AgentBackend, SessionOptions, SessionRecord};
use crate::config::OrchestratorConfig;
use crate::connection::{ConnectTarget, ConnectionHandle};
use crate::dispatch::Dispatcher;
use crate::error::{BackendError, OrchestratorError, TransportError};
use crate::events::{ClientEvent, EventBus};
use crate::metrics::ClientMetrics;
use crate::stream::{PushStreamOpener, StreamHandle, StreamReader};

/// A `submit_response` that can still be cancelled.
struct InFlight {
    request_id: u64,
    cancel: CancellationToken,
}

struct SessionEntry {
    session: Session,
    transport: SessionTransport,
    stream: Option<StreamHandle>,
    in_flight: Option<InFlight>,
}

#[derive(Default)]
struct Registry {
    agents: HashMap<String, Agent>,
    by_type: HashMap<AgentType, String>,
    /// Latest session per agent id, including completed ones.
    sessions: HashMap<String, SessionEntry>,
    /// Present only while the agent is in the background.
    buffers: HashMap<String, EventBuffer>,
    /// Shared-connection routing: conversation id → agent id.
    conversations: HashMap<String, String>,
    active: Option<String>,
}

impl Registry {
    fn active_agent(&self) -> Option<&Agent> {
        self.active.as_ref().and_then(|id| self.agents.get(id))
    }

    fn agent_of_type(&self, agent_type: AgentType) -> Option<&Agent> {
        self.by_type
            .get(&agent_type)
            .and_then(|id| self.agents.get(id))
    }

    fn live_session(&self, agent_id: &str) -> Option<&SessionEntry> {
        self.sessions
            .get(agent_id)
            .filter(|entry| entry.session.is_live())
    }

    fn insert_agent(&mut self, agent: Agent) {
        self.by_type
            .entry(agent.agent_type())
            .or_insert_with(|| agent.id().to_string());
        self.agents.insert(agent.id().to_string(), agent);
    }

    fn resolve(&self, agent_id: Option<&str>) -> Result<String, OrchestratorError> {
        match agent_id {
            Some(id) => Ok(id.to_string()),
            None => self.active.clone().ok_or(OrchestratorError::NoActiveAgent),
        }
    }

    fn snapshot(&self, agent: &Agent) -> AgentSnapshot {
        let entry = self.sessions.get(agent.id());
        AgentSnapshot {
            id: agent.id().to_string(),
            agent_type: agent.agent_type(),
            policy: agent.policy(),
            active: self.active.as_deref() == Some(agent.id()),
            session: entry.map(|e| e.session.clone()),
            stream_open: entry
                .and_then(|e| e.stream.as_ref())
                .is_some_and(StreamHandle::is_open),
            buffered: self.buffers.get(agent.id()).map_or(0, EventBuffer::len),
        }
    }
}

/// How a freshly created or resumed session receives its events.
enum Attach {
    Stream {
        url: String,
    },
    Shared {
        conversation_id: String,
        connect: Option<ConnectTarget>,
    },
}

fn ensure_can_switch(active: &Agent, to: Option<AgentType>) -> Result<(), OrchestratorError> {
    if active.policy().can_switch_agents {
        Ok(())
    } else {
        Err(OrchestratorError::SwitchNotAllowed {
            from: active.agent_type(),
            to,
        })
    }
}

struct Inner {
    registry: Mutex<Registry>,
    dispatcher: Dispatcher,
    backend: Arc<dyn AgentBackend>,
    streams: Arc<dyn PushStreamOpener>,
    /// Needed only by shared-connection sessions.
    connection: Option<ConnectionHandle>,
    config: OrchestratorConfig,
    metrics: Arc<ClientMetrics>,
    next_request: AtomicU64,
}

/// Cheaply cloneable handle; all clones share one registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        streams: Arc<dyn PushStreamOpener>,
        connection: Option<ConnectionHandle>,
        dispatcher: Dispatcher,
        config: OrchestratorConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                dispatcher,
                backend,
                streams,
                connection,
                config,
                metrics,
                next_request: AtomicU64::new(1),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        self.inner.dispatcher.bus()
    }

    async fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().await
    }

    // === Agents ===

    /// The cached agent of this type, or a new one from the backend.
    pub async fn get_or_create_agent(
        &self,
        agent_type: AgentType,
    ) -> Result<Agent, OrchestratorError> {
        let cached = self.lock().await.agent_of_type(agent_type).cloned();
        if let Some(agent) = cached {
            return Ok(agent);
        }

        let record = self.inner.backend.create_agent(agent_type).await?;
        if record.agent_type != agent_type {
            warn!(
                agent_id = %record.id,
                requested = %agent_type,
                returned = %record.agent_type,
                "backend returned a different agent type"
            );
        }

        let mut registry = self.lock().await;
        if let Some(agent) = registry.agent_of_type(agent_type) {
            return Ok(agent.clone());
        }
        let agent = Agent::new(record.id, agent_type);
        registry.insert_agent(agent.clone());
        info!(agent_id = %agent.id(), agent_type = %agent_type, "agent created");
        Ok(agent)
    }

    pub async fn switch_to_agent(&self, agent_type: AgentType) -> Result<Agent, OrchestratorError> {
        {
            let registry = self.lock().await;
            if let Some(active) = registry.active_agent() {
                if active.agent_type() == agent_type {
                    debug!(agent_type = %agent_type, "agent already active");
                    return Ok(active.clone());
                }
                ensure_can_switch(active, Some(agent_type))?;
            }
        }

        let target = self.get_or_create_agent(agent_type).await?;

        let mut registry = self.lock().await;
        let previous = match registry.active_agent() {
            Some(active) if active.id() == target.id() => return Ok(active.clone()),
            Some(active) => {
                ensure_can_switch(active, Some(agent_type))?;
                Some(active.agent_type())
            }
            None => None,
        };

        self.demote_active(&mut registry);
        self.activate(&mut registry, target.id());

        info!(from = ?previous, to = %agent_type, agent_id = %target.id(), "switched agent");
        self.bus().publish(ClientEvent::AgentChanged {
            previous,
            current: Some(agent_type),
            agent_id: Some(target.id().to_string()),
        });
        Ok(target)
    }

    /// Background the active agent and leave none active.
    pub async fn deactivate_agent(&self) -> Result<(), OrchestratorError> {
        let mut registry = self.lock().await;
        let previous = match registry.active_agent() {
            Some(active) => {
                ensure_can_switch(active, None)?;
                active.agent_type()
            }
            None => return Ok(()),
        };

        self.demote_active(&mut registry);

        info!(from = %previous, "agent deactivated");
        self.bus().publish(ClientEvent::AgentChanged {
            previous: Some(previous),
            current: None,
            agent_id: None,
        });
        Ok(())
    }

    fn demote_active(&self, registry: &mut Registry) {
        let Some(agent_id) = registry.active.take() else {
            return;
        };
        if let Some(entry) = registry
            .sessions
            .get_mut(&agent_id)
            .filter(|entry| entry.session.is_live())
        {
            entry.session.status = SessionStatus::Background;
            registry.buffers.insert(
                agent_id.clone(),
                EventBuffer::new(self.inner.config.buffer_capacity),
            );
            debug!(agent_id = %agent_id, session_id = %entry.session.id, "session moved to background");
        }
    }

    fn activate(&self, registry: &mut Registry, agent_id: &str) {
        if let Some(buffer) = registry.buffers.remove(agent_id) {
            let replay = buffer.into_replay();
            let count = replay.events.len();
            for event in &replay.events {
                self.inner
                    .dispatcher
                    .dispatch(&event.envelope, Some(agent_id), true);
            }
            self.inner.metrics.events_replayed(count as u64);
            info!(agent_id = %agent_id, replayed = count, dropped = replay.dropped, "replayed background events");
            self.bus().publish(ClientEvent::ReplayCompleted {
                agent_id: agent_id.to_string(),
                replayed: count,
                dropped: replay.dropped,
            });
        }

        if let Some(entry) = registry
            .sessions
            .get_mut(agent_id)
            .filter(|entry| entry.session.is_live())
        {
            entry.session.status = SessionStatus::Active;
        }
        registry.active = Some(agent_id.to_string());
    }

    // === Sessions ===

    /// Start a session for the active agent.
    pub async fn start_session(&self, options: SessionOptions) -> Result<Session, OrchestratorError> {
        let (agent_id, agent_type) = {
            let registry = self.lock().await;
            let agent = registry
                .active_agent()
                .ok_or(OrchestratorError::NoActiveAgent)?;
            if registry.live_session(agent.id()).is_some() {
                return Err(OrchestratorError::SessionAlreadyRunning {
                    agent_id: agent.id().to_string(),
                });
            }
            (agent.id().to_string(), agent.agent_type())
        };

        let record = self
            .inner
            .backend
            .create_session(&agent_id, &options)
            .await
            .map_err(|e| {
                warn!(agent_id = %agent_id, code = e.error_code(), "session start failed: {}", e);
                OrchestratorError::SessionStartFailed(e)
            })?;
        let attach = self.plan_attach(agent_type, &record)?;
        self.attach(&agent_id, agent_type, record, attach).await
    }

    /// Re-attach to a session that is already running server-side.
    pub async fn resume_session(&self, agent_id: &str) -> Result<Session, OrchestratorError> {
        let cached_type = {
            let registry = self.lock().await;
            if let Some(entry) = registry.live_session(agent_id) {
                debug!(agent_id = %agent_id, "session already attached");
                return Ok(entry.session.clone());
            }
            registry.agents.get(agent_id).map(Agent::agent_type)
        };

        let agent_type = match cached_type {
            Some(agent_type) => agent_type,
            None => self.inner.backend.fetch_agent(agent_id).await?.agent_type,
        };
        let record = self
            .inner
            .backend
            .fetch_running_session(agent_id)
            .await?
            .ok_or_else(|| OrchestratorError::NoSession {
                agent_id: agent_id.to_string(),
            })?;
        let attach = self.plan_attach(agent_type, &record)?;
        self.attach(agent_id, agent_type, record, attach).await
    }

    fn plan_attach(
        &self,
        agent_type: AgentType,
        record: &SessionRecord,
    ) -> Result<Attach, OrchestratorError> {
        let invalid = |what: &str| {
            OrchestratorError::SessionStartFailed(BackendError::InvalidResponse(format!(
                "session {} has no {what}",
                record.id
            )))
        };

        match agent_type.transport() {
            SessionTransport::PushStream => record
                .stream_url
                .clone()
                .map(|url| Attach::Stream { url })
                .ok_or_else(|| invalid("stream url")),
            SessionTransport::Shared => {
                if record.connect.is_some() && self.inner.connection.is_none() {
                    return Err(TransportError::NotConnected.into());
                }
                let conversation_id = record
                    .connect
                    .as_ref()
                    .map(|target| target.conversation_id.clone())
                    .or_else(|| record.conversation_id.clone())
                    .ok_or_else(|| invalid("conversation"))?;
                Ok(Attach::Shared {
                    conversation_id,
                    connect: record.connect.clone(),
                })
            }
        }
    }

    async fn attach(
        &self,
        agent_id: &str,
        agent_type: AgentType,
        record: SessionRecord,
        attach: Attach,
    ) -> Result<Session, OrchestratorError> {
        let (session, connect, created_buffer) = {
            let mut registry = self.lock().await;
            if registry.live_session(agent_id).is_some() {
                return Err(OrchestratorError::SessionAlreadyRunning {
                    agent_id: agent_id.to_string(),
                });
            }
            if !registry.agents.contains_key(agent_id) {
                registry.insert_agent(Agent::new(agent_id.to_string(), agent_type));
            }

            let active = registry.active.as_deref() == Some(agent_id);
            if let Some(agent) = registry.agents.get_mut(agent_id) {
                agent.reset_overrides();
                if let Some(restrictions) = &record.restrictions {
                    agent.apply_overrides(restrictions);
                }
            }
            let created_buffer = !active && !registry.buffers.contains_key(agent_id);
            if created_buffer {
                registry.buffers.insert(
                    agent_id.to_string(),
                    EventBuffer::new(self.inner.config.buffer_capacity),
                );
            }

            let (transport, conversation_id, connect, stream_url) = match attach {
                Attach::Stream { url } => (
                    SessionTransport::PushStream,
                    record.conversation_id.clone(),
                    None,
                    Some(url),
                ),
                Attach::Shared {
                    conversation_id,
                    connect,
                } => {
                    registry
                        .conversations
                        .insert(conversation_id.clone(), agent_id.to_string());
                    (SessionTransport::Shared, Some(conversation_id), connect, None)
                }
            };

            let session = Session {
                id: record.id,
                agent_id: agent_id.to_string(),
                conversation_id,
                status: if active {
                    SessionStatus::Active
                } else {
                    SessionStatus::Background
                },
            };
            info!(
                agent_id = %agent_id,
                session_id = %session.id,
                status = ?session.status,
                "session attached"
            );

            // Must precede the stream open.
            self.bus().publish(ClientEvent::SessionStarted {
                agent_id: agent_id.to_string(),
                session_id: session.id.clone(),
            });

            let stream = stream_url.map(|url| {
                StreamReader {
                    opener: self.inner.streams.clone(),
                    url,
                    agent_id: agent_id.to_string(),
                    session_id: session.id.clone(),
                    backoff: self.inner.config.stream_backoff,
                    orchestrator: self.clone(),
                    metrics: self.inner.metrics.clone(),
                }
                .spawn()
            });
            registry.sessions.insert(
                agent_id.to_string(),
                SessionEntry {
                    session: session.clone(),
                    transport,
                    stream,
                    in_flight: None,
                },
            );
            (session, connect, created_buffer)
        };

        if let (Some(target), Some(connection)) = (connect, self.inner.connection.as_ref())
            && let Err(e) = connection.connect(target).await
        {
            self.detach(agent_id, &session.id, created_buffer, &e).await;
            return Err(e.into());
        }
        Ok(session)
    }

    /// Undo an `attach` whose shared connection could not be reached.
    async fn detach(
        &self,
        agent_id: &str,
        session_id: &str,
        created_buffer: bool,
        error: &TransportError,
    ) {
        let mut registry = self.lock().await;
        let owned = registry
            .sessions
            .get(agent_id)
            .is_some_and(|entry| entry.session.id == session_id);
        if !owned {
            return;
        }
        if let Some(entry) = registry.sessions.remove(agent_id)
            && let Some(conversation_id) = &entry.session.conversation_id
        {
            registry.conversations.remove(conversation_id);
        }
        if created_buffer {
            registry.buffers.remove(agent_id);
        }

        warn!(agent_id = %agent_id, session_id = %session_id, code = error.error_code(), "session rolled back: {}", error);
        self.bus().publish(ClientEvent::SessionTerminated {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            reason: Some(error.to_string()),
        });
    }

    pub async fn terminate_session(
        &self,
        agent_id: &str,
        reason: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let no_session = || OrchestratorError::NoSession {
            agent_id: agent_id.to_string(),
        };

        let session = {
            let mut registry = self.lock().await;
            let agent = registry.agents.get(agent_id).ok_or_else(no_session)?;
            if !agent.policy().can_end_early {
                return Err(OrchestratorError::EarlyTerminationNotAllowed {
                    agent_id: agent_id.to_string(),
                });
            }
            if registry.live_session(agent_id).is_none() {
                return Err(no_session());
            }
            let Some(mut entry) = registry.sessions.remove(agent_id) else {
                return Err(no_session());
            };

            if let Some(stream) = entry.stream.take() {
                stream.end();
            }
            if let Some(in_flight) = entry.in_flight.take() {
                in_flight.cancel.cancel();
            }
            registry.buffers.remove(agent_id);
            if let Some(conversation_id) = &entry.session.conversation_id {
                registry.conversations.remove(conversation_id);
            }
            entry.session.status = SessionStatus::Terminated;

            info!(agent_id = %agent_id, session_id = %entry.session.id, reason = ?reason, "session terminated");
            self.bus().publish(ClientEvent::SessionTerminated {
                agent_id: agent_id.to_string(),
                session_id: entry.session.id.clone(),
                reason: reason.map(str::to_owned),
            });
            entry.session
        };

        if let Err(e) = self
            .inner
            .backend
            .terminate_session(&session.id, reason)
            .await
        {
            warn!(session_id = %session.id, code = e.error_code(), "backend terminate failed: {}", e);
        }
        Ok(())
    }

    /// Forward a widget answer for `agent_id` (or the active agent).
    ///
    /// Fails with [`OrchestratorError::Cancelled`] if
    /// [`cancel_request`](Self::cancel_request) runs first.
    pub async fn submit_response(
        &self,
        agent_id: Option<&str>,
        response: &WidgetResponse,
    ) -> Result<(), OrchestratorError> {
        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let (agent_id, session_id) = {
            let mut registry = self.lock().await;
            let agent_id = registry.resolve(agent_id)?;
            let entry = registry
                .sessions
                .get_mut(&agent_id)
                .filter(|entry| entry.session.is_live())
                .ok_or_else(|| OrchestratorError::NoSession {
                    agent_id: agent_id.clone(),
                })?;
            entry.in_flight = Some(InFlight {
                request_id,
                cancel: cancel.clone(),
            });
            (agent_id, entry.session.id.clone())
        };

        debug!(agent_id = %agent_id, session_id = %session_id, item_id = %response.item_id, "submitting response");
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            sent = self.inner.backend.submit_response(&session_id, response) => {
                sent.map_err(OrchestratorError::from)
            }
        };

        let mut registry = self.lock().await;
        if let Some(entry) = registry.sessions.get_mut(&agent_id)
            && entry
                .in_flight
                .as_ref()
                .is_some_and(|f| f.request_id == request_id)
        {
            entry.in_flight = None;
        }
        result
    }

    /// Cancel the in-flight submission for `agent_id` (or the active agent).
    ///
    /// Returns `false` when nothing was in flight. The session itself is left
    /// as it is.
    pub async fn cancel_request(&self, agent_id: Option<&str>) -> Result<bool, OrchestratorError> {
        let (session_id, in_flight) = {
            let mut registry = self.lock().await;
            let agent_id = registry.resolve(agent_id)?;
            let entry = registry
                .sessions
                .get_mut(&agent_id)
                .ok_or(OrchestratorError::NoSession { agent_id })?;
            (entry.session.id.clone(), entry.in_flight.take())
        };

        let Some(in_flight) = in_flight else {
            return Ok(false);
        };
        in_flight.cancel.cancel();
        info!(session_id = %session_id, "request cancelled");
        self.inner.backend.cancel_request(&session_id).await?;
        Ok(true)
    }

    // === Inbound events ===

    /// An envelope from `session_id`'s push stream.
    pub(crate) async fn ingest(&self, agent_id: &str, session_id: &str, envelope: Envelope) {
        let mut registry = self.lock().await;
        let current = registry
            .live_session(agent_id)
            .is_some_and(|entry| entry.session.id == session_id);
        if !current {
            debug!(agent_id = %agent_id, session_id = %session_id, "dropping frame for ended session");
            return;
        }
        self.route(&mut registry, agent_id, envelope);
    }

    /// An envelope from the shared connection. Routed by conversation id;
    /// anything no session claims is published without an owner.
    pub async fn ingest_shared(&self, envelope: Envelope) {
        let mut registry = self.lock().await;
        let owner = match envelope.message_type().plane() {
            Some(Plane::System) => None,
            _ => envelope
                .conversation_id()
                .and_then(|c| registry.conversations.get(c))
                .cloned(),
        };
        match owner {
            Some(agent_id) => self.route(&mut registry, &agent_id, envelope),
            None => {
                self.inner.dispatcher.dispatch(&envelope, None, false);
            }
        }
    }

    fn route(&self, registry: &mut Registry, agent_id: &str, envelope: Envelope) {
        if envelope.message_type() == &MessageType::ConversationConfig {
            self.apply_config(registry, agent_id, &envelope);
        }

        match decide(registry.active.as_deref(), agent_id, envelope.message_type()) {
            Route::Publish => {
                self.inner
                    .dispatcher
                    .dispatch(&envelope, Some(agent_id), false);
            }
            Route::Buffer => self.buffer(registry, agent_id, envelope),
            Route::Complete { owner_active } => {
                self.complete(registry, agent_id, envelope, owner_active)
            }
        }
    }

    fn apply_config(&self, registry: &mut Registry, agent_id: &str, envelope: &Envelope) {
        let restrictions = match envelope.payload_as::<ConversationConfig>() {
            Ok(config) => config.restrictions,
            Err(e) => {
                warn!(agent_id = %agent_id, "malformed conversation.config payload: {}", e);
                return;
            }
        };
        if let (Some(restrictions), Some(agent)) = (restrictions, registry.agents.get_mut(agent_id))
            && !restrictions.is_empty()
        {
            agent.apply_overrides(&restrictions);
            info!(agent_id = %agent_id, policy = ?agent.policy(), "restriction overrides applied");
        }
    }

    fn buffer(&self, registry: &mut Registry, agent_id: &str, envelope: Envelope) {
        let capacity = self.inner.config.buffer_capacity;
        let evicted = registry
            .buffers
            .entry(agent_id.to_string())
            .or_insert_with(|| EventBuffer::new(capacity))
            .push(envelope);
        self.inner.metrics.event_buffered();
        if evicted {
            self.inner.metrics.event_dropped();
            debug!(agent_id = %agent_id, "background buffer full, dropped oldest event");
        }
    }

    fn complete(
        &self,
        registry: &mut Registry,
        agent_id: &str,
        envelope: Envelope,
        owner_active: bool,
    ) {
        let terminated = envelope.message_type() == &MessageType::ConversationTerminated;

        let mut session_id = None;
        if let Some(entry) = registry.sessions.get_mut(agent_id) {
            entry.session.status = if terminated {
                SessionStatus::Terminated
            } else {
                SessionStatus::Completed
            };
            if let Some(stream) = entry.stream.take() {
                stream.end();
            }
            if let Some(conversation_id) = &entry.session.conversation_id {
                registry.conversations.remove(conversation_id);
            }
            session_id = Some(entry.session.id.clone());
        }

        if owner_active {
            self.inner
                .dispatcher
                .dispatch(&envelope, Some(agent_id), false);
        } else {
            self.buffer(registry, agent_id, envelope);
        }

        match session_id {
            Some(session_id) => {
                info!(
                    agent_id = %agent_id,
                    session_id = %session_id,
                    terminated = terminated,
                    background = !owner_active,
                    "session completed"
                );
                self.bus().publish(ClientEvent::SessionCompleted {
                    agent_id: agent_id.to_string(),
                    session_id,
                    terminated,
                    background: !owner_active,
                });
            }
            None => warn!(agent_id = %agent_id, "completion for an agent without a session"),
        }
    }

    /// The reader for `session_id` gave up reconnecting.
    pub(crate) async fn stream_lost(&self, agent_id: &str, session_id: &str) {
        let mut registry = self.lock().await;
        if let Some(entry) = registry
            .sessions
            .get_mut(agent_id)
            .filter(|entry| entry.session.id == session_id)
        {
            entry.stream = None;
        }
        warn!(agent_id = %agent_id, session_id = %session_id, "push stream lost");
        self.bus().publish(ClientEvent::StreamLost {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
        });
    }

    // === Queries ===

    /// The active agent's policy, or [`RestrictionPolicy::PERMISSIVE`].
    pub async fn policy(&self) -> RestrictionPolicy {
        self.lock()
            .await
            .active_agent()
            .map(Agent::policy)
            .unwrap_or(RestrictionPolicy::PERMISSIVE)
    }

    pub async fn can_switch_agents(&self) -> bool {
        self.policy().await.can_switch_agents
    }

    pub async fn can_access_conversations(&self) -> bool {
        self.policy().await.can_access_conversations
    }

    pub async fn can_type_free_text(&self) -> bool {
        self.policy().await.can_type_free_text
    }

    pub async fn can_end_early(&self) -> bool {
        self.policy().await.can_end_early
    }

    pub async fn active_agent(&self) -> Option<AgentSnapshot> {
        let registry = self.lock().await;
        registry.active_agent().map(|agent| registry.snapshot(agent))
    }

    pub async fn agent(&self, agent_id: &str) -> Option<AgentSnapshot> {
        let registry = self.lock().await;
        registry
            .agents
            .get(agent_id)
            .map(|agent| registry.snapshot(agent))
    }

    pub async fn agents(&self) -> Vec<AgentSnapshot> {
        let registry = self.lock().await;
        let mut agents: Vec<_> = registry
            .agents
            .values()
            .map(|agent| registry.snapshot(agent))
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Transport of the active agent's live session, if any.
    pub async fn active_transport(&self) -> Option<SessionTransport> {
        let registry = self.lock().await;
        let agent_id = registry.active.as_deref()?;
        registry.live_session(agent_id).map(|entry| entry.transport)
    }

    /// The shared connection expired for good. Every session ends, every
    /// buffer is discarded and no agent is left active. The backend is not
    /// told: its credentials are what expired.
    pub async fn expire(&self, reason: &str) {
        let mut guard = self.lock().await;
        let registry = &mut *guard;
        for entry in registry.sessions.values_mut() {
            if let Some(stream) = entry.stream.take() {
                stream.end();
            }
            if let Some(in_flight) = entry.in_flight.take() {
                in_flight.cancel.cancel();
            }
            if entry.session.is_live() {
                entry.session.status = SessionStatus::Terminated;
            }
        }
        registry.conversations.clear();
        registry.buffers.clear();

        let previous = registry
            .active
            .take()
            .and_then(|id| registry.agents.get(&id).map(Agent::agent_type));
        warn!(reason = %reason, previous = ?previous, "sessions expired");
        if previous.is_some() {
            self.bus().publish(ClientEvent::AgentChanged {
                previous,
                current: None,
                agent_id: None,
            });
        }
    }

    /// Stop every push stream and cancel every in-flight submission.
    pub async fn shutdown(&self) {
        let mut registry = self.lock().await;
        for entry in registry.sessions.values_mut() {
            if let Some(stream) = entry.stream.take() {
                stream.end();
            }
            if let Some(in_flight) = entry.in_flight.take() {
                in_flight.cancel.cancel();
            }
        }
        debug!("orchestrator shut down");
    }
}
