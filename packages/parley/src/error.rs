//! Error types and stable error codes.

use tokio_tungstenite::tungstenite;

use crate::agents::AgentType;

/// Failures of the physical duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    /// The outbound payload could not be serialized. Nothing was written.
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection actor is gone")]
    ActorGone,
}

impl TransportError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::SendFailed(_) => "send_failed",
            Self::Encode(_) => "encode_failed",
            Self::NotConnected => "not_connected",
            Self::ActorGone => "actor_gone",
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let refused = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if refused {
            Self::ConnectFailed(format!("server is unavailable ({err})"))
        } else {
            Self::ConnectFailed(err.to_string())
        }
    }
}

/// Failures talking to the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl BackendError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Unavailable => "backend_unavailable",
            Self::Status { .. } => "backend_status",
            Self::InvalidResponse(_) => "backend_invalid_response",
            Self::Http(_) => "backend_http",
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }
}

/// Failures of a session's push stream. Always retried up to the stream cap.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("push stream open failed: {0}")]
    Open(String),

    #[error("push stream read failed: {0}")]
    Read(String),
}

impl StreamError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Open(_) => "stream_open_failed",
            Self::Read(_) => "stream_read_failed",
        }
    }
}

/// Errors returned by the agent orchestrator's command surface.
///
/// Policy and precondition errors reflect caller misuse and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("switching from {from} is not allowed")]
    SwitchNotAllowed {
        from: AgentType,
        to: Option<AgentType>,
    },

    #[error("agent {agent_id} may not end its session early")]
    EarlyTerminationNotAllowed { agent_id: String },

    #[error("no agent is active")]
    NoActiveAgent,

    #[error("agent {agent_id} has no running session")]
    NoSession { agent_id: String },

    #[error("agent {agent_id} already has a running session")]
    SessionAlreadyRunning { agent_id: String },

    #[error("session start failed: {0}")]
    SessionStartFailed(#[source] BackendError),

    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl OrchestratorError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::SwitchNotAllowed { .. } => "switch_not_allowed",
            Self::EarlyTerminationNotAllowed { .. } => "early_termination_not_allowed",
            Self::NoActiveAgent => "no_active_agent",
            Self::NoSession { .. } => "no_session",
            Self::SessionAlreadyRunning { .. } => "session_already_running",
            Self::SessionStartFailed(_) => "session_start_failed",
            Self::Cancelled => "cancelled",
            Self::Backend(e) => e.error_code(),
            Self::Transport(e) => e.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransportError::NotConnected.error_code(), "not_connected");
        assert_eq!(
            TransportError::Encode("bad key".into()).error_code(),
            "encode_failed"
        );
        assert_eq!(
            OrchestratorError::SwitchNotAllowed {
                from: AgentType::Evaluator,
                to: Some(AgentType::Tutor),
            }
            .error_code(),
            "switch_not_allowed"
        );
        assert_eq!(
            OrchestratorError::SessionStartFailed(BackendError::Unavailable).error_code(),
            "session_start_failed"
        );
    }

    #[test]
    fn test_nested_codes_pass_through() {
        let err = OrchestratorError::from(TransportError::ActorGone);
        assert_eq!(err.error_code(), "actor_gone");
        let err = OrchestratorError::from(BackendError::Status {
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(err.error_code(), "backend_status");
    }

    #[test]
    fn test_refused_connection_is_reported_as_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        match err {
            TransportError::ConnectFailed(msg) => assert!(msg.starts_with("server is unavailable")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
