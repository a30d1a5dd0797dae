//! The versioned wire envelope.
//!
//! ```text
//! { id, type: "plane.category.action", version: "1.0",
//!   timestamp: ISO-8601, conversationId: string|null, payload: object }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolDecodeError;
use crate::message::MessageType;

/// Protocol version stamped on every outbound envelope.
pub const PROTOCOL_VERSION: &str = "1.0";

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// An immutable protocol envelope.
///
/// Fields are only readable; a new envelope is built for every send and
/// every received frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl Envelope {
    /// Build an outbound envelope with a fresh id and the current time.
    pub fn outbound(
        message_type: MessageType,
        payload: Value,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            version: default_version(),
            timestamp: Utc::now(),
            conversation_id,
            payload: Some(payload),
        }
    }

    /// Parse a raw wire frame.
    ///
    /// The frame must be a JSON object with a non-empty string `type`. Every
    /// other field is optional on the way in.
    pub fn decode(frame: &str) -> Result<Self, ProtocolDecodeError> {
        let value: Value = serde_json::from_str(frame)?;
        let object = value.as_object().ok_or(ProtocolDecodeError::NotAnObject)?;
        match object.get("type") {
            Some(Value::String(s)) if !s.is_empty() => {}
            Some(_) => return Err(ProtocolDecodeError::InvalidType),
            None => return Err(ProtocolDecodeError::MissingType),
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to the wire format.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Same major version as [`PROTOCOL_VERSION`].
    pub fn is_compatible(&self) -> bool {
        let major = |v: &str| v.split('.').next().map(str::to_owned);
        major(&self.version) == major(PROTOCOL_VERSION)
    }

    /// What subscribers receive: the nested payload, or the whole envelope
    /// when the frame carried no payload field.
    pub fn event_body(&self) -> Value {
        match &self.payload {
            Some(payload) => payload.clone(),
            None => serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }

    /// Deserialize the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.payload.clone().unwrap_or(Value::Null))
    }
}
