//! The subscribe/publish channel consumed by the presentation layer.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use parley_protocol::Envelope;

use crate::agents::AgentType;
use crate::dispatch::EventName;

/// A decoded protocol message, as handed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolEvent {
    pub name: EventName,
    /// Owning agent, or `None` for traffic on the shared connection that no
    /// agent session claimed.
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub envelope_id: String,
    pub payload: Value,
    /// Delivered from a background buffer on switch-back.
    pub replayed: bool,
}

impl ProtocolEvent {
    pub fn from_envelope(
        name: EventName,
        envelope: &Envelope,
        agent_id: Option<&str>,
        replayed: bool,
    ) -> Self {
        Self {
            name,
            agent_id: agent_id.map(str::to_owned),
            conversation_id: envelope.conversation_id().map(str::to_owned),
            envelope_id: envelope.id().to_owned(),
            payload: envelope.event_body(),
            replayed,
        }
    }
}

/// Everything the core publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    // === Connection ===
    Connected {
        conversation_id: Option<String>,
    },
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    Disconnected {
        code: Option<u16>,
        reason: String,
    },
    /// The one terminal signal: the reconnect cap ran out (`attempts` is set)
    /// or the server rejected our credentials. No `Disconnected` precedes it.
    /// The UI should re-authenticate or start over.
    SessionExpired {
        reason: String,
        attempts: Option<u32>,
    },

    // === Protocol ===
    Protocol(ProtocolEvent),
    /// A type with no handler. Carries the whole envelope.
    Unhandled {
        envelope: Envelope,
    },

    // === Agents ===
    AgentChanged {
        previous: Option<AgentType>,
        current: Option<AgentType>,
        agent_id: Option<String>,
    },
    SessionStarted {
        agent_id: String,
        session_id: String,
    },
    SessionCompleted {
        agent_id: String,
        session_id: String,
        terminated: bool,
        background: bool,
    },
    SessionTerminated {
        agent_id: String,
        session_id: String,
        reason: Option<String>,
    },
    StreamLost {
        agent_id: String,
        session_id: String,
    },
    ReplayCompleted {
        agent_id: String,
        replayed: usize,
        dropped: u64,
    },
}

/// Cloneable broadcast bus. Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: ClientEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "no subscribers");
                0
            }
        }
    }
}
