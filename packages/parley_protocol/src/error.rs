//! Decode errors.

/// A frame that could not be turned into an [`Envelope`](crate::Envelope).
///
/// Callers log and discard these; a bad frame never affects connection state.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolDecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no type")]
    MissingType,

    #[error("frame type is not a non-empty string")]
    InvalidType,
}

impl ProtocolDecodeError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Json(_) => "malformed_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::InvalidType => "invalid_type",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(ProtocolDecodeError::NotAnObject.error_code(), "not_an_object");
        assert_eq!(ProtocolDecodeError::MissingType.error_code(), "missing_type");
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            ProtocolDecodeError::from(json_err).error_code(),
            "malformed_json"
        );
    }
}
