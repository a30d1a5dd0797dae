//! Typed payloads for the messages the client interprets itself.
//!
//! Everything else is routed with an opaque `serde_json::Value` payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `system.error` codes that mean the credential is gone and retrying is pointless.
pub const CREDENTIAL_ERROR_CODES: &[&str] = &[
    "auth_expired",
    "token_expired",
    "session_expired",
    "unauthorized",
];

/// First server message on a new connection (`system.connection.established`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablished {
    pub session_id: String,
    /// Milliseconds between heartbeats the server expects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `system.ping` / `system.pong`. The pong echoes the ping's client time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Unix milliseconds when the ping left the client.
    pub client_time: i64,
}

/// `system.error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fatal: bool,
}

impl ServerError {
    /// Non-recoverable: escalated instead of retried.
    pub fn is_terminal(&self) -> bool {
        self.fatal || CREDENTIAL_ERROR_CODES.contains(&self.code.as_str())
    }
}

/// Capability overrides pushed by the server, either at session creation or
/// inside `control.conversation.config`. `None` leaves the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_switch_agents: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_access_conversations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_type_free_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_end_early: Option<bool>,
}

impl RestrictionOverrides {
    /// Layer `other` on top of `self`; set fields in `other` win.
    pub fn merge(&mut self, other: &RestrictionOverrides) {
        if other.can_switch_agents.is_some() {
            self.can_switch_agents = other.can_switch_agents;
        }
        if other.can_access_conversations.is_some() {
            self.can_access_conversations = other.can_access_conversations;
        }
        if other.can_type_free_text.is_some() {
            self.can_type_free_text = other.can_type_free_text;
        }
        if other.can_end_early.is_some() {
            self.can_end_early = other.can_end_early;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `control.conversation.config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<RestrictionOverrides>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `data.message.send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub content: String,
}

/// `data.response.submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetResponse {
    pub item_id: String,
    pub widget_id: String,
    pub widget_type: String,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_established_from_raw_json() {
        let raw = json!({
            "sessionId": "s-1",
            "heartbeatInterval": 15000,
            "capabilities": ["widgets", "tools"],
            "models": [{"id": "m1", "name": "Model One"}]
        });
        let est: ConnectionEstablished = serde_json::from_value(raw).unwrap();
        assert_eq!(est.session_id, "s-1");
        assert_eq!(est.heartbeat_interval, Some(15000));
        assert_eq!(est.capabilities, vec!["widgets", "tools"]);
        assert_eq!(est.models[0].name.as_deref(), Some("Model One"));
        assert!(est.default_model.is_none());
    }

    #[test]
    fn test_server_error_terminal() {
        let err = ServerError {
            code: "token_expired".into(),
            message: String::new(),
            fatal: false,
        };
        assert!(err.is_terminal());

        let err: ServerError =
            serde_json::from_value(json!({"code": "rate_limited", "message": "slow"})).unwrap();
        assert!(!err.is_terminal());

        let err: ServerError =
            serde_json::from_value(json!({"code": "boom", "fatal": true})).unwrap();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_overrides_merge_keeps_unset_fields() {
        let mut base = RestrictionOverrides {
            can_switch_agents: Some(false),
            can_end_early: Some(true),
            ..Default::default()
        };
        base.merge(&RestrictionOverrides {
            can_end_early: Some(false),
            can_type_free_text: Some(true),
            ..Default::default()
        });
        assert_eq!(base.can_switch_agents, Some(false));
        assert_eq!(base.can_end_early, Some(false));
        assert_eq!(base.can_type_free_text, Some(true));
        assert_eq!(base.can_access_conversations, None);
    }

    #[test]
    fn test_conversation_config_keeps_extra_fields() {
        let cfg: ConversationConfig = serde_json::from_value(json!({
            "restrictions": {"canSwitchAgents": false},
            "mode": "exam"
        }))
        .unwrap();
        assert_eq!(
            cfg.restrictions.unwrap().can_switch_agents,
            Some(false)
        );
        assert_eq!(cfg.extra["mode"], "exam");
    }

    #[test]
    fn test_widget_response_wire_shape() {
        let resp = WidgetResponse {
            item_id: "i1".into(),
            widget_id: "w1".into(),
            widget_type: "choice".into(),
            value: json!(["a"]),
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["itemId"], "i1");
        assert_eq!(value["widgetType"], "choice");
    }
}
