use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use parley_protocol::{
    ConnectionEstablished, Envelope, Heartbeat, MessageType, ModelInfo, ServerError,
};

use super::backoff::Backoff;
use super::state::{ConnectTarget, ConnectionState, ConnectionStatus};
use super::transport::{ABNORMAL_CLOSE, Connector, NORMAL_CLOSE, Transport, TransportEvent};
use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::events::{ClientEvent, EventBus};
use crate::metrics::ClientMetrics;

/// Commands that can be sent to the connection actor
#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        target: ConnectTarget,
        respond_to: oneshot::Sender<()>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    /// Wrap `payload` in an envelope and write it. Replies with the envelope id.
    Send {
        message_type: MessageType,
        payload: Value,
        respond_to: oneshot::Sender<Result<String, TransportError>>,
    },
    Status {
        respond_to: oneshot::Sender<ConnectionStatus>,
    },
}

/// Handle to communicate with the connection actor
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Start connecting to `target`. Returns once the attempt is under way;
    /// watch [`state`](Self::watch_state) or the event bus for the outcome.
    pub async fn connect(&self, target: ConnectTarget) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Connect {
                target,
                respond_to: tx,
            })
            .await
            .map_err(|_| TransportError::ActorGone)?;
        rx.await.map_err(|_| TransportError::ActorGone)
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Disconnect { respond_to: tx })
            .await
            .map_err(|_| TransportError::ActorGone)?;
        rx.await.map_err(|_| TransportError::ActorGone)
    }

    pub async fn send(
        &self,
        message_type: MessageType,
        payload: Value,
    ) -> Result<String, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Send {
                message_type,
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|_| TransportError::ActorGone)?;
        rx.await.map_err(|_| TransportError::ActorGone)?
    }

    pub async fn status(&self) -> Result<ConnectionStatus, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionCommand::Status { respond_to: tx })
            .await
            .map_err(|_| TransportError::ActorGone)?;
        rx.await.map_err(|_| TransportError::ActorGone)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// A handle whose actor has already stopped.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (sender, _) = mpsc::channel(1);
        let (_, state) = watch::channel(ConnectionState::Disconnected);
        Self { sender, state }
    }
}

/// Spawn the connection actor. Returns its handle and the receiver of every
/// decoded inbound envelope, in arrival order.
pub fn spawn<C: Connector>(
    connector: C,
    config: ConnectionConfig,
    bus: EventBus,
    metrics: Arc<ClientMetrics>,
) -> (ConnectionHandle, mpsc::Receiver<Envelope>) {
    let (sender, receiver) = mpsc::channel(32);
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let actor = ConnectionActor {
        connector: Arc::new(connector),
        backoff: config.backoff,
        keepalive_period: config.keepalive_interval,
        config,
        receiver,
        inbound: inbound_tx,
        bus,
        metrics,
        state_tx,
        target: None,
        transport: None,
        pending: None,
        timers: Timers::default(),
        attempt: 0,
        server: ServerInfo::default(),
        latency_ms: None,
        last_close_code: None,
    };
    tokio::spawn(actor.run());

    (
        ConnectionHandle {
            sender,
            state: state_rx,
        },
        inbound_rx,
    )
}

type PendingConnect<T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send>>;

/// Scheduled work owned by the actor. Cleared on every state exit.
#[derive(Default)]
struct Timers {
    keepalive: Option<Interval>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Timers {
    fn arm_keepalive(&mut self, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(interval);
    }

    fn cancel_all(&mut self) {
        self.keepalive = None;
        self.retry = None;
    }
}

/// Seeded by `system.connection.established`.
#[derive(Default)]
struct ServerInfo {
    session_id: Option<String>,
    capabilities: Option<Vec<String>>,
    models: Vec<ModelInfo>,
    default_model: Option<String>,
}

struct ConnectionActor<C: Connector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    backoff: Backoff,
    keepalive_period: Duration,
    receiver: mpsc::Receiver<ConnectionCommand>,
    inbound: mpsc::Sender<Envelope>,
    bus: EventBus,
    metrics: Arc<ClientMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    target: Option<ConnectTarget>,
    transport: Option<C::Transport>,
    /// At most one connect attempt is in flight.
    pending: Option<PendingConnect<C::Transport>>,
    timers: Timers,
    attempt: u32,
    server: ServerInfo,
    latency_ms: Option<u64>,
    last_close_code: Option<u16>,
}

impl<C: Connector> ConnectionActor<C> {
    async fn run(mut self) {
        debug!("connection actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                result = wait_pending(&mut self.pending) => self.on_connect_result(result),
                event = next_event(&mut self.transport) => self.on_transport_event(event).await,
                _ = tick(&mut self.timers.keepalive) => self.send_ping().await,
                _ = fire(&mut self.timers.retry) => self.start_attempt(),
            }
        }

        self.shutdown().await;
        debug!("connection actor stopped");
    }

    async fn handle_command(&mut self, cmd: ConnectionCommand) {
        match cmd {
            ConnectionCommand::Connect { target, respond_to } => {
                self.connect(target).await;
                let _ = respond_to.send(());
            }
            ConnectionCommand::Disconnect { respond_to } => {
                self.disconnect("client disconnect").await;
                let _ = respond_to.send(());
            }
            ConnectionCommand::Send {
                message_type,
                payload,
                respond_to,
            } => {
                let result = self.send(message_type, payload).await;
                let _ = respond_to.send(result);
            }
            ConnectionCommand::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "connection state");
        }
    }

    fn conversation_id(&self) -> Option<String> {
        self.target.as_ref().map(|t| t.conversation_id.clone())
    }

    async fn connect(&mut self, target: ConnectTarget) {
        let same = self
            .target
            .as_ref()
            .is_some_and(|t| t.conversation_id == target.conversation_id);

        match self.state() {
            ConnectionState::Disconnected => {}
            _ if same => {
                debug!(conversation_id = %target.conversation_id, "already connected or connecting");
                return;
            }
            _ => {
                info!(
                    from = ?self.conversation_id(),
                    to = %target.conversation_id,
                    "switching conversation"
                );
                self.teardown(NORMAL_CLOSE, "switching conversation").await;
            }
        }

        info!(url = %target.url, conversation_id = %target.conversation_id, "connecting");
        self.target = Some(target);
        self.attempt = 0;
        self.server = ServerInfo::default();
        self.keepalive_period = self.config.keepalive_interval;
        self.set_state(ConnectionState::Connecting);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let connector = self.connector.clone();
        let url = target.url.clone();
        self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    fn on_connect_result(&mut self, result: Result<C::Transport, TransportError>) {
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.attempt = 0;
                self.set_state(ConnectionState::Connected);
                self.timers.arm_keepalive(self.keepalive_period);
                let conversation_id = self.conversation_id();
                info!(conversation_id = ?conversation_id, "connected");
                self.bus.publish(ClientEvent::Connected { conversation_id });
            }
            Err(e) => {
                warn!(attempt = self.attempt, error = %e, "connect attempt failed");
                self.on_lost(ABNORMAL_CLOSE, e.to_string());
            }
        }
    }

    /// The transport is gone (or never came up). Retry or give up.
    fn on_lost(&mut self, code: u16, reason: String) {
        self.transport = None;
        self.pending = None;
        self.timers.cancel_all();
        self.last_close_code = Some(code);

        if code == NORMAL_CLOSE {
            info!(reason = %reason, "connection closed normally");
            self.finish_disconnected(Some(code), reason);
            return;
        }

        match self.backoff.next_attempt(self.attempt) {
            Some((attempt, delay)) => {
                self.attempt = attempt;
                self.metrics.reconnect_attempt();
                self.set_state(ConnectionState::Reconnecting { attempt });
                info!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    code = code,
                    "connection lost, scheduling reconnect"
                );
                self.timers.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.bus.publish(ClientEvent::Reconnecting {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            None => {
                let attempts = self.attempt;
                warn!(attempts = attempts, code = code, reason = %reason, "reconnect attempts exhausted");
                self.expire("reconnect attempts exhausted".to_string(), Some(attempts));
            }
        }
    }

    /// Stop for good. `SessionExpired` is the only event published.
    fn expire(&mut self, reason: String, attempts: Option<u32>) {
        self.target = None;
        self.attempt = 0;
        self.set_state(ConnectionState::Disconnected);
        self.bus
            .publish(ClientEvent::SessionExpired { reason, attempts });
    }

    fn finish_disconnected(&mut self, code: Option<u16>, reason: String) {
        let was = self.state();
        self.target = None;
        self.attempt = 0;
        self.set_state(ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            self.bus.publish(ClientEvent::Disconnected { code, reason });
        }
    }

    /// Drop every attempt, timer and the open transport.
    async fn teardown(&mut self, code: u16, reason: &str) {
        self.pending = None;
        self.timers.cancel_all();
        if let Some(mut transport) = self.transport.take() {
            transport.close(code, reason).await;
            self.last_close_code = Some(code);
        }
    }

    async fn disconnect(&mut self, reason: &str) {
        self.teardown(NORMAL_CLOSE, reason).await;
        info!(reason = %reason, "disconnected");
        self.finish_disconnected(Some(NORMAL_CLOSE), reason.to_string());
    }

    async fn send(
        &mut self,
        message_type: MessageType,
        payload: Value,
    ) -> Result<String, TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        let envelope = Envelope::outbound(message_type, payload, self.conversation_id());
        self.write(&envelope).await?;
        Ok(envelope.id().to_string())
    }

    async fn write(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let frame = envelope
            .to_frame()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        match transport.send(frame).await {
            Ok(()) => {
                self.metrics.frame_sent();
                Ok(())
            }
            Err(e) => {
                warn!(message_type = %envelope.message_type(), error = %e, "send failed");
                self.on_lost(ABNORMAL_CLOSE, e.to_string());
                Err(e)
            }
        }
    }

    async fn send_ping(&mut self) {
        if !self.state().is_connected() {
            return;
        }
        let ping = Envelope::outbound(
            MessageType::Ping,
            json!({ "clientTime": Utc::now().timestamp_millis() }),
            self.conversation_id(),
        );
        let _ = self.write(&ping).await;
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.on_frame(&frame).await,
            TransportEvent::Closed { code, reason } => self.on_lost(code, reason),
        }
    }

    async fn on_frame(&mut self, frame: &str) {
        self.metrics.frame_received();
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.decode_error();
                warn!(code = e.error_code(), "discarding frame: {}", e);
                return;
            }
        };
        if !envelope.is_compatible() {
            warn!(version = %envelope.version(), "envelope version mismatch");
        }

        match envelope.message_type() {
            MessageType::Ping => {
                let echo = envelope.payload().cloned().unwrap_or_else(|| json!({}));
                let pong = Envelope::outbound(MessageType::Pong, echo, self.conversation_id());
                let _ = self.write(&pong).await;
            }
            MessageType::Pong => match envelope.payload_as::<Heartbeat>() {
                Ok(heartbeat) => {
                    let rtt = Utc::now().timestamp_millis() - heartbeat.client_time;
                    self.latency_ms = Some(rtt.max(0) as u64);
                    debug!(latency_ms = rtt, "pong");
                }
                Err(e) => debug!("pong without client time: {}", e),
            },
            MessageType::ConnectionEstablished => {
                match envelope.payload_as::<ConnectionEstablished>() {
                    Ok(established) => self.on_established(established),
                    Err(e) => warn!("malformed connection.established payload: {}", e),
                }
            }
            MessageType::Error => {
                let terminal = envelope
                    .payload_as::<ServerError>()
                    .ok()
                    .filter(ServerError::is_terminal);
                if let Some(error) = terminal {
                    warn!(code = %error.code, message = %error.message, "terminal server error");
                    self.teardown(NORMAL_CLOSE, "terminal server error").await;
                    self.expire(error.code, None);
                    return;
                }
            }
            _ => {}
        }

        if self.inbound.send(envelope).await.is_err() {
            debug!("inbound receiver dropped");
        }
    }

    fn on_established(&mut self, established: ConnectionEstablished) {
        info!(
            session_id = %established.session_id,
            capabilities = established.capabilities.len(),
            "connection established"
        );
        if let Some(ms) = established.heartbeat_interval.filter(|ms| *ms > 0) {
            self.keepalive_period = Duration::from_millis(ms);
            if self.state().is_connected() {
                self.timers.arm_keepalive(self.keepalive_period);
            }
        }
        self.server = ServerInfo {
            session_id: Some(established.session_id),
            capabilities: Some(established.capabilities),
            models: established.models,
            default_model: established.default_model,
        };
    }

    fn status(&self) -> ConnectionStatus {
        let capabilities = match &self.server.capabilities {
            Some(caps) => caps.clone(),
            None => self
                .target
                .as_ref()
                .map(|t| t.capabilities.clone())
                .unwrap_or_default(),
        };
        ConnectionStatus {
            state: self.state(),
            attempt: self.attempt,
            conversation_id: self.conversation_id(),
            server_session_id: self.server.session_id.clone(),
            capabilities,
            models: self.server.models.clone(),
            default_model: self.server.default_model.clone(),
            latency_ms: self.latency_ms,
            keepalive_interval_ms: self.keepalive_period.as_millis() as u64,
            last_close_code: self.last_close_code,
        }
    }

    async fn shutdown(&mut self) {
        self.teardown(NORMAL_CLOSE, "client shutdown").await;
        self.set_state(ConnectionState::Disconnected);
    }
}

async fn wait_pending<T>(slot: &mut Option<PendingConnect<T>>) -> Result<T, TransportError> {
    match slot.as_mut() {
        Some(fut) => {
            let result = fut.await;
            *slot = None;
            result
        }
        None => pending().await,
    }
}

async fn next_event<T: Transport>(slot: &mut Option<T>) -> TransportEvent {
    match slot.as_mut() {
        Some(transport) => transport.next_event().await,
        None => pending().await,
    }
}

async fn tick(slot: &mut Option<Interval>) {
    match slot.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn fire(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => {
            sleep.as_mut().await;
            *slot = None;
        }
        None => pending().await,
    }
}
