//! Message taxonomy.
//!
//! Every frame carries a dotted type of the form `plane.category.action`
//! (or `plane.action` for the two-segment system types such as `system.ping`).
//! The type is decoded once at the boundary into [`MessageType`]; anything the
//! client does not know about is kept verbatim in [`MessageType::Unrecognized`]
//! so it can still be routed down the generic path.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One of the three protocol namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    /// Connection lifecycle, heartbeats, server errors.
    System,
    /// Conversation flow, items, widgets.
    Control,
    /// Content, tools, messages, responses.
    Data,
}

impl Plane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plane::System => "system",
            Plane::Control => "control",
            Plane::Data => "data",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Plane::System),
            "control" => Some(Plane::Control),
            "data" => Some(Plane::Data),
            _ => None,
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dotted type split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeKey<'a> {
    pub plane: Plane,
    /// `None` for two-segment types (`system.ping`).
    pub category: Option<&'a str>,
    pub action: &'a str,
}

impl<'a> TypeKey<'a> {
    /// Split a dotted type. Returns `None` when the first segment is not a
    /// known plane, a segment is empty, or there are more than three segments.
    pub fn split(dotted: &'a str) -> Option<Self> {
        let mut parts = dotted.split('.');
        let plane = Plane::parse(parts.next()?)?;
        let second = parts.next()?;
        let third = parts.next();
        if parts.next().is_some() || second.is_empty() {
            return None;
        }
        match third {
            None => Some(TypeKey {
                plane,
                category: None,
                action: second,
            }),
            Some("") => None,
            Some(action) => Some(TypeKey {
                plane,
                category: Some(second),
                action,
            }),
        }
    }
}

/// Every dotted type the client knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    // === System plane ===
    ConnectionEstablished,
    Ping,
    Pong,
    Error,

    // === Control plane ===
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
    FlowChatInput,
    FlowProgress,

    // === Data plane ===
    ContentChunk,
    ContentComplete,
    ToolCall,
    ToolResult,
    MessageSend,
    MessageAck,
    ResponseSubmit,
    ResponseAck,

    /// Anything else, kept verbatim.
    Unrecognized(String),
}

/// Wire strings of every known type, in declaration order.
pub const KNOWN_TYPES: &[&str] = &[
    "system.connection.established",
    "system.ping",
    "system.pong",
    "system.error",
    "control.conversation.config",
    "control.conversation.started",
    "control.conversation.paused",
    "control.conversation.resumed",
    "control.conversation.completed",
    "control.conversation.terminated",
    "control.item.context",
    "control.item.score",
    "control.item.timeout",
    "control.item.expired",
    "control.widget.render",
    "control.widget.state",
    "control.widget.dismiss",
    "control.widget.update",
    "control.flow.chatInput",
    "control.flow.progress",
    "data.content.chunk",
    "data.content.complete",
    "data.tool.call",
    "data.tool.result",
    "data.message.send",
    "data.message.ack",
    "data.response.submit",
    "data.response.ack",
];

impl MessageType {
    /// Decode a dotted wire type. Never fails: unknown strings become
    /// [`MessageType::Unrecognized`].
    pub fn parse(dotted: &str) -> Self {
        match dotted {
            "system.connection.established" => Self::ConnectionEstablished,
            "system.ping" => Self::Ping,
            "system.pong" => Self::Pong,
            "system.error" => Self::Error,
            "control.conversation.config" => Self::ConversationConfig,
            "control.conversation.started" => Self::ConversationStarted,
            "control.conversation.paused" => Self::ConversationPaused,
            "control.conversation.resumed" => Self::ConversationResumed,
            "control.conversation.completed" => Self::ConversationCompleted,
            "control.conversation.terminated" => Self::ConversationTerminated,
            "control.item.context" => Self::ItemContext,
            "control.item.score" => Self::ItemScore,
            "control.item.timeout" => Self::ItemTimeout,
            "control.item.expired" => Self::ItemExpired,
            "control.widget.render" => Self::WidgetRender,
            "control.widget.state" => Self::WidgetState,
            "control.widget.dismiss" => Self::WidgetDismiss,
            "control.widget.update" => Self::WidgetUpdate,
            "control.flow.chatInput" => Self::FlowChatInput,
            "control.flow.progress" => Self::FlowProgress,
            "data.content.chunk" => Self::ContentChunk,
            "data.content.complete" => Self::ContentComplete,
            "data.tool.call" => Self::ToolCall,
            "data.tool.result" => Self::ToolResult,
            "data.message.send" => Self::MessageSend,
            "data.message.ack" => Self::MessageAck,
            "data.response.submit" => Self::ResponseSubmit,
            "data.response.ack" => Self::ResponseAck,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionEstablished => "system.connection.established",
            Self::Ping => "system.ping",
            Self::Pong => "system.pong",
            Self::Error => "system.error",
            Self::ConversationConfig => "control.conversation.config",
            Self::ConversationStarted => "control.conversation.started",
            Self::ConversationPaused => "control.conversation.paused",
            Self::ConversationResumed => "control.conversation.resumed",
            Self::ConversationCompleted => "control.conversation.completed",
            Self::ConversationTerminated => "control.conversation.terminated",
            Self::ItemContext => "control.item.context",
            Self::ItemScore => "control.item.score",
            Self::ItemTimeout => "control.item.timeout",
            Self::ItemExpired => "control.item.expired",
            Self::WidgetRender => "control.widget.render",
            Self::WidgetState => "control.widget.state",
            Self::WidgetDismiss => "control.widget.dismiss",
            Self::WidgetUpdate => "control.widget.update",
            Self::FlowChatInput => "control.flow.chatInput",
            Self::FlowProgress => "control.flow.progress",
            Self::ContentChunk => "data.content.chunk",
            Self::ContentComplete => "data.content.complete",
            Self::ToolCall => "data.tool.call",
            Self::ToolResult => "data.tool.result",
            Self::MessageSend => "data.message.send",
            Self::MessageAck => "data.message.ack",
            Self::ResponseSubmit => "data.response.submit",
            Self::ResponseAck => "data.response.ack",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Split into `plane.category.action`, if the string has that shape.
    pub fn key(&self) -> Option<TypeKey<'_>> {
        TypeKey::split(self.as_str())
    }

    pub fn plane(&self) -> Option<Plane> {
        self.key().map(|k| k.plane)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// Session-ending control messages. These are never buffered away.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            Self::ConversationCompleted | Self::ConversationTerminated
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
