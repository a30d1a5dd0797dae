//! Envelope codec and message taxonomy for the Parley realtime protocol.
//!
//! The protocol is split into three planes (`system`, `control`, `data`).
//! Frames are JSON envelopes; this crate owns their shape and nothing else.

pub mod envelope;
pub mod error;
pub mod message;
pub mod payloads;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use error::ProtocolDecodeError;
pub use message::{KNOWN_TYPES, MessageType, Plane, TypeKey};
pub use payloads::{
    ChatMessage, ConnectionEstablished, ConversationConfig, Heartbeat, ModelInfo,
    RestrictionOverrides, ServerError, WidgetResponse,
};
