//! In-memory fakes for the transport, the REST collaborator and push streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast, mpsc};
use uuid::Uuid;

use parley_protocol::{Envelope, RestrictionOverrides, WidgetResponse};

use crate::agents::{AgentType, SessionTransport};
use crate::backend::{AgentBackend, AgentRecord, SessionOptions, SessionRecord};
use crate::connection::{ABNORMAL_CLOSE, ConnectTarget, Connector, Transport, TransportEvent};
use crate::error::{BackendError, StreamError, TransportError};
use crate::events::ClientEvent;
use crate::stream::{FrameStream, PushStreamOpener};

/// Everything currently queued on a broadcast receiver.
pub fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A wire frame as the server would send it.
pub fn frame(message_type: &str, payload: Value, conversation_id: Option<&str>) -> String {
    json!({
        "id": Uuid::new_v4().to_string(),
        "type": message_type,
        "version": "1.0",
        "conversationId": conversation_id,
        "payload": payload,
    })
    .to_string()
}

pub fn envelope(message_type: &str, payload: Value, conversation_id: Option<&str>) -> Envelope {
    Envelope::decode(&frame(message_type, payload, conversation_id)).expect("test frame")
}

// =============================================================================
// Transport
// =============================================================================

/// Hands out a [`FakeServer`] for every successful connect.
#[derive(Clone)]
pub struct FakeConnector {
    servers: mpsc::UnboundedSender<FakeServer>,
    connects: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Self {
                servers,
                connects: Arc::new(AtomicUsize::new(0)),
                failures: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Total connect attempts, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self, url: &str) -> Result<FakeTransport, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectFailed("refused".into()));
        }

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Mutex::new(None));
        let fail_sends = Arc::new(AtomicBool::new(false));

        let _ = self.servers.send(FakeServer {
            url: url.to_string(),
            incoming: incoming_tx,
            sent: sent_rx,
            closed: closed.clone(),
            fail_sends: fail_sends.clone(),
        });
        Ok(FakeTransport {
            incoming: incoming_rx,
            sent: sent_tx,
            closed,
            fail_sends,
        })
    }
}

pub struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        let _ = self.sent.send(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.incoming
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed {
                code: ABNORMAL_CLOSE,
                reason: "server dropped".into(),
            })
    }

    async fn close(&mut self, code: u16, reason: &str) {
        *self.closed.lock().unwrap() = Some((code, reason.to_string()));
    }
}

/// The server side of one fake connection.
pub struct FakeServer {
    pub url: String,
    incoming: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
    fail_sends: Arc<AtomicBool>,
}

impl FakeServer {
    pub fn push(&self, message_type: &str, payload: Value) {
        self.push_raw(&frame(message_type, payload, None));
    }

    pub fn push_in(&self, conversation_id: &str, message_type: &str, payload: Value) {
        self.push_raw(&frame(message_type, payload, Some(conversation_id)));
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.incoming.send(TransportEvent::Frame(frame.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.incoming.send(TransportEvent::Closed {
            code,
            reason: "server close".into(),
        });
    }

    /// Next frame the client wrote, decoded.
    pub async fn next_sent(&mut self) -> Envelope {
        let frame = self.sent.recv().await.expect("client transport dropped");
        Envelope::decode(&frame).expect("client sent a malformed frame")
    }

    /// Close code and reason, if the client closed this transport.
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// REST collaborator
// =============================================================================

#[derive(Default)]
struct BackendState {
    next_id: u32,
    calls: Vec<String>,
    agents: HashMap<String, AgentRecord>,
    running: HashMap<String, SessionRecord>,
    fail_sessions: usize,
    restrictions: Option<RestrictionOverrides>,
}

/// Records every call. Push-stream sessions get `fake://stream/{session}`,
/// shared sessions connect to `fake://ws` in conversation `conv-{session}`.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    hold_submissions: Arc<AtomicBool>,
    release: Arc<Notify>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn fail_sessions(&self, n: usize) {
        self.state.lock().unwrap().fail_sessions = n;
    }

    /// Overrides attached to every session created from now on.
    pub fn session_restrictions(&self, restrictions: RestrictionOverrides) {
        self.state.lock().unwrap().restrictions = Some(restrictions);
    }

    /// Seed an agent with a session the client does not know about yet.
    pub fn insert_running(&self, agent: AgentRecord, session: SessionRecord) {
        let mut state = self.state.lock().unwrap();
        state.running.insert(agent.id.clone(), session);
        state.agents.insert(agent.id.clone(), agent);
    }

    /// Submissions block until [`release_submission`](Self::release_submission).
    pub fn hold_submissions(&self) {
        self.hold_submissions.store(true, Ordering::SeqCst);
    }

    pub fn release_submission(&self) {
        self.release.notify_one();
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn stream_url(session_id: &str) -> String {
    format!("fake://stream/{session_id}")
}

pub fn session_record(agent_type: AgentType, session_id: &str) -> SessionRecord {
    match agent_type.transport() {
        SessionTransport::PushStream => SessionRecord {
            id: session_id.to_string(),
            stream_url: Some(stream_url(session_id)),
            connect: None,
            conversation_id: None,
            restrictions: None,
        },
        SessionTransport::Shared => SessionRecord {
            id: session_id.to_string(),
            stream_url: None,
            connect: Some(ConnectTarget {
                url: "fake://ws".into(),
                conversation_id: format!("conv-{session_id}"),
                capabilities: vec![],
            }),
            conversation_id: None,
            restrictions: None,
        },
    }
}

#[async_trait]
impl AgentBackend for FakeBackend {
    async fn open_conversation(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<ConnectTarget, BackendError> {
        self.record(format!("open:{}", conversation_id.unwrap_or("-")));
        Ok(ConnectTarget {
            url: "fake://ws".into(),
            conversation_id: conversation_id.unwrap_or("conv-new").to_string(),
            capabilities: vec!["widgets".into()],
        })
    }

    async fn create_agent(&self, agent_type: AgentType) -> Result<AgentRecord, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let record = AgentRecord {
            id: format!("{agent_type}-{}", state.next_id),
            agent_type,
        };
        state.calls.push(format!("create_agent:{agent_type}"));
        state.agents.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<AgentRecord, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("fetch_agent:{agent_id}"));
        state
            .agents
            .get(agent_id)
            .cloned()
            .ok_or(BackendError::Status {
                status: 404,
                body: "no such agent".into(),
            })
    }

    async fn create_session(
        &self,
        agent_id: &str,
        _options: &SessionOptions,
    ) -> Result<SessionRecord, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_session:{agent_id}"));
        if state.fail_sessions > 0 {
            state.fail_sessions -= 1;
            return Err(BackendError::Status {
                status: 503,
                body: "no capacity".into(),
            });
        }
        let agent_type = state
            .agents
            .get(agent_id)
            .map(|a| a.agent_type)
            .ok_or(BackendError::Status {
                status: 404,
                body: "no such agent".into(),
            })?;
        state.next_id += 1;
        let mut record = session_record(agent_type, &format!("s-{}", state.next_id));
        record.restrictions = state.restrictions;
        state.running.insert(agent_id.to_string(), record.clone());
        Ok(record)
    }

    async fn fetch_running_session(
        &self,
        agent_id: &str,
    ) -> Result<Option<SessionRecord>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("fetch_running_session:{agent_id}"));
        Ok(state.running.get(agent_id).cloned())
    }

    async fn terminate_session(
        &self,
        session_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("terminate:{session_id}"));
        state.running.retain(|_, s| s.id != session_id);
        Ok(())
    }

    async fn submit_response(
        &self,
        session_id: &str,
        response: &WidgetResponse,
    ) -> Result<(), BackendError> {
        self.record(format!("submit:{session_id}:{}", response.item_id));
        if self.hold_submissions.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(())
    }

    async fn cancel_request(&self, session_id: &str) -> Result<(), BackendError> {
        self.record(format!("cancel:{session_id}"));
        Ok(())
    }
}

// =============================================================================
// Push streams
// =============================================================================

type FrameSender = mpsc::UnboundedSender<Result<String, StreamError>>;

#[derive(Default)]
struct StreamsState {
    opened: Vec<String>,
    senders: HashMap<String, FrameSender>,
    fail_opens: usize,
    observer: Option<broadcast::Receiver<ClientEvent>>,
    started_before_open: Vec<bool>,
}

#[derive(Clone, Default)]
pub struct FakeStreams {
    state: Arc<Mutex<StreamsState>>,
}

impl FakeStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn fail_opens(&self, n: usize) {
        self.state.lock().unwrap().fail_opens = n;
    }

    /// On every open, record whether `SessionStarted` was already published.
    pub fn observe(&self, rx: broadcast::Receiver<ClientEvent>) {
        self.state.lock().unwrap().observer = Some(rx);
    }

    pub fn started_before_open(&self) -> Vec<bool> {
        self.state.lock().unwrap().started_before_open.clone()
    }

    pub fn push(&self, url: &str, message_type: &str, payload: Value) {
        self.push_raw(url, &frame(message_type, payload, None));
    }

    pub fn push_raw(&self, url: &str, frame: &str) {
        if let Some(tx) = self.state.lock().unwrap().senders.get(url) {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    /// End the current stream from the server side.
    pub fn hang_up(&self, url: &str) {
        self.state.lock().unwrap().senders.remove(url);
    }

    /// Whether the client has dropped its end of the current stream.
    pub fn is_closed(&self, url: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .senders
            .get(url)
            .is_none_or(|tx| tx.is_closed())
    }

    /// Poll until at least `count` opens have happened.
    pub async fn wait_for_opens(&self, count: usize) {
        while self.opened().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the client drops the current stream for `url`.
    pub async fn wait_closed(&self, url: &str) {
        while !self.is_closed(url) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl PushStreamOpener for FakeStreams {
    async fn open(&self, url: &str) -> Result<FrameStream, StreamError> {
        let mut state = self.state.lock().unwrap();
        state.opened.push(url.to_string());
        if let Some(rx) = state.observer.as_mut() {
            let seen = drain(rx)
                .iter()
                .any(|e| matches!(e, ClientEvent::SessionStarted { .. }));
            state.started_before_open.push(seen);
        }
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(StreamError::Open("refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.senders.insert(url.to_string(), tx);
        let frames = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(frames.boxed())
    }
}
