//! Event dispatcher.
//!
//! Every decoded message type maps to at most one published event name. Types
//! with no entry are either on the handled-elsewhere allow-list (consumed inline
//! by the connection actor, or outbound-only) or get a warning and are published
//! as [`ClientEvent::Unhandled`].

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

use parley_protocol::{Envelope, MessageType};

use crate::events::{ClientEvent, EventBus, ProtocolEvent};
use crate::metrics::ClientMetrics;

/// Types deliberately consumed outside the event bus. Includes a few legacy
/// raw strings older servers still send.
pub const HANDLED_ELSEWHERE: &[&str] = &[
    "system.ping",
    "system.pong",
    "data.message.send",
    "data.response.submit",
    "ping",
    "pong",
    "heartbeat",
];

/// Names of the events published for protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    ConnectionEstablished,
    ServerError,
    ConversationConfig,
    ConversationStarted,
    ConversationPaused,
    ConversationResumed,
    ConversationCompleted,
    ConversationTerminated,
    ItemContext,
    ItemScore,
    ItemTimeout,
    ItemExpired,
    WidgetRender,
    WidgetState,
    WidgetDismiss,
    WidgetUpdate,
    ChatInput,
    Progress,
    ContentChunk,
    ContentComplete,
    ToolCall,
    ToolResult,
    MessageAck,
    ResponseAck,
}

impl EventName {
    /// The dispatch table.
    pub fn for_type(message_type: &MessageType) -> Option<EventName> {
        use MessageType as T;
        let name = match message_type {
            T::ConnectionEstablished => Self::ConnectionEstablished,
            T::Error => Self::ServerError,
            T::ConversationConfig => Self::ConversationConfig,
            T::ConversationStarted => Self::ConversationStarted,
            T::ConversationPaused => Self::ConversationPaused,
            T::ConversationResumed => Self::ConversationResumed,
            T::ConversationCompleted => Self::ConversationCompleted,
            T::ConversationTerminated => Self::ConversationTerminated,
            T::ItemContext => Self::ItemContext,
            T::ItemScore => Self::ItemScore,
            T::ItemTimeout => Self::ItemTimeout,
            T::ItemExpired => Self::ItemExpired,
            T::WidgetRender => Self::WidgetRender,
            T::WidgetState => Self::WidgetState,
            T::WidgetDismiss => Self::WidgetDismiss,
            T::WidgetUpdate => Self::WidgetUpdate,
            T::FlowChatInput => Self::ChatInput,
            T::FlowProgress => Self::Progress,
            T::ContentChunk => Self::ContentChunk,
            T::ContentComplete => Self::ContentComplete,
            T::ToolCall => Self::ToolCall,
            T::ToolResult => Self::ToolResult,
            T::MessageAck => Self::MessageAck,
            T::ResponseAck => Self::ResponseAck,
            T::Ping | T::Pong | T::MessageSend | T::ResponseSubmit | T::Unrecognized(_) => {
                return None;
            }
        };
        Some(name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection.established",
            Self::ServerError => "server.error",
            Self::ConversationConfig => "conversation.config",
            Self::ConversationStarted => "conversation.started",
            Self::ConversationPaused => "conversation.paused",
            Self::ConversationResumed => "conversation.resumed",
            Self::ConversationCompleted => "conversation.completed",
            Self::ConversationTerminated => "conversation.terminated",
            Self::ItemContext => "item.context",
            Self::ItemScore => "item.score",
            Self::ItemTimeout => "item.timeout",
            Self::ItemExpired => "item.expired",
            Self::WidgetRender => "widget.render",
            Self::WidgetState => "widget.state",
            Self::WidgetDismiss => "widget.dismiss",
            Self::WidgetUpdate => "widget.update",
            Self::ChatInput => "flow.chat_input",
            Self::Progress => "flow.progress",
            Self::ContentChunk => "content.chunk",
            Self::ContentComplete => "content.complete",
            Self::ToolCall => "tool.call",
            Self::ToolResult => "tool.result",
            Self::MessageAck => "message.ack",
            Self::ResponseAck => "response.ack",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Result of dispatching one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    Published(EventName),
    HandledElsewhere,
    Unhandled,
}

/// Publishes decoded envelopes on the event bus.
#[derive(Clone)]
pub struct Dispatcher {
    bus: EventBus,
    metrics: Arc<ClientMetrics>,
}

impl Dispatcher {
    pub fn new(bus: EventBus, metrics: Arc<ClientMetrics>) -> Self {
        Self { bus, metrics }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Look up the envelope's type and publish it.
    pub fn dispatch(
        &self,
        envelope: &Envelope,
        agent_id: Option<&str>,
        replayed: bool,
    ) -> DispatchResult {
        let message_type = envelope.message_type();
        if let Some(name) = EventName::for_type(message_type) {
            self.bus.publish(ClientEvent::Protocol(ProtocolEvent::from_envelope(
                name, envelope, agent_id, replayed,
            )));
            self.metrics.event_published();
            return DispatchResult::Published(name);
        }

        if HANDLED_ELSEWHERE.contains(&message_type.as_str()) {
            trace!(message_type = %message_type, "handled elsewhere");
            return DispatchResult::HandledElsewhere;
        }

        warn!(
            message_type = %message_type,
            envelope_id = %envelope.id(),
            "no handler for message type"
        );
        self.metrics.event_unhandled();
        self.bus.publish(ClientEvent::Unhandled {
            envelope: envelope.clone(),
        });
        DispatchResult::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::KNOWN_TYPES;
    use serde_json::json;

    fn dispatcher() -> (Dispatcher, tokio::sync::broadcast::Receiver<ClientEvent>) {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        (Dispatcher::new(bus, Arc::new(ClientMetrics::new())), rx)
    }

    #[test]
    fn test_every_known_type_is_published_or_allow_listed() {
        for raw in KNOWN_TYPES {
            let ty = MessageType::parse(raw);
            assert!(
                EventName::for_type(&ty).is_some() || HANDLED_ELSEWHERE.contains(raw),
                "{raw} has no route"
            );
        }
    }

    #[test]
    fn test_publishes_payload() {
        let (dispatcher, mut rx) = dispatcher();
        let env = Envelope::decode(
            r#"{"id":"e1","type":"data.content.chunk","conversationId":"c","payload":{"text":"hi"}}"#,
        )
        .unwrap();
        let result = dispatcher.dispatch(&env, Some("agent-1"), false);
        assert_eq!(result, DispatchResult::Published(EventName::ContentChunk));

        match rx.try_recv().unwrap() {
            ClientEvent::Protocol(event) => {
                assert_eq!(event.name, EventName::ContentChunk);
                assert_eq!(event.agent_id.as_deref(), Some("agent-1"));
                assert_eq!(event.conversation_id.as_deref(), Some("c"));
                assert_eq!(event.payload, json!({"text": "hi"}));
                assert!(!event.replayed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_publishes_raw_envelope_without_payload() {
        let (dispatcher, mut rx) = dispatcher();
        let env = Envelope::decode(r#"{"id":"e2","type":"control.item.timeout"}"#).unwrap();
        dispatcher.dispatch(&env, None, true);
        match rx.try_recv().unwrap() {
            ClientEvent::Protocol(event) => {
                assert_eq!(event.payload["id"], "e2");
                assert!(event.replayed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_allow_listed_types_publish_nothing() {
        let (dispatcher, mut rx) = dispatcher();
        for raw in ["system.ping", "pong", "heartbeat"] {
            let env = Envelope::decode(&json!({ "type": raw }).to_string()).unwrap();
            assert_eq!(
                dispatcher.dispatch(&env, None, false),
                DispatchResult::HandledElsewhere
            );
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_type_goes_to_unhandled() {
        let (dispatcher, mut rx) = dispatcher();
        let env = Envelope::decode(r#"{"type":"data.telemetry.flush","payload":{}}"#).unwrap();
        assert_eq!(
            dispatcher.dispatch(&env, None, false),
            DispatchResult::Unhandled
        );
        match rx.try_recv().unwrap() {
            ClientEvent::Unhandled { envelope } => {
                assert_eq!(envelope.message_type().as_str(), "data.telemetry.flush")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dispatcher.metrics.snapshot().events.unhandled, 1);
    }
}
