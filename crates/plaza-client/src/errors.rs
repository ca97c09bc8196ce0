//! Client error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors establishing a room session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The `Origin` value is not a valid header value.
    #[error("invalid origin header: {0:?}")]
    InvalidOrigin(String),
    /// The server answered the upgrade with a plain HTTP status (403, 426, ...).
    #[error("server rejected the connection with HTTP {status}")]
    Rejected {
        /// Response status code.
        status: u16,
    },
    /// URL, TCP, TLS, or WebSocket handshake failure.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] Box<tungstenite::Error>),
    /// The channel closed before the room sent `init`.
    #[error("connection closed before init")]
    Closed,
    /// The room did not send `init` in time.
    #[error("timed out waiting for init")]
    InitTimeout,
}

impl ClientError {
    pub(crate) fn from_handshake(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Http(response) => Self::Rejected {
                status: response.status().as_u16(),
            },
            other => Self::Handshake(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display() {
        let err = ClientError::Rejected { status: 403 };
        assert_eq!(err.to_string(), "server rejected the connection with HTTP 403");
    }

    #[test]
    fn non_http_handshake_errors_are_wrapped() {
        let err = ClientError::from_handshake(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, ClientError::Handshake(_)));
        assert!(err.to_string().contains("handshake failed"));
    }

    #[test]
    fn invalid_origin_display() {
        let err = ClientError::InvalidOrigin("bad\norigin".into());
        assert!(err.to_string().contains("invalid origin"));
    }
}
