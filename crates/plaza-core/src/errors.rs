//! Protocol error types.

use thiserror::Error;

/// Reasons an inbound payload is not a valid protocol message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// The object has no string `type` field.
    #[error("missing or non-string `type` field")]
    MissingType,
    /// The `type` is not one this side accepts.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// The `type` is known but its fields do not match.
    #[error("invalid fields for `{kind}`: {source}")]
    InvalidFields {
        /// The message type that failed.
        kind: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Short classification string for logging.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidFields { .. } => "invalid_fields",
        }
    }
}
