//! Transport-level error types.

use thiserror::Error;

use crate::transport::ConnectionState;

/// Errors that can occur while driving a duplex transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    /// WebSocket send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The operation requires an open connection.
    #[error("connection is {state}, expected open")]
    InvalidState { state: ConnectionState },

    /// The connection was closed (locally or by the peer).
    #[error("connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message() {
        let err = TransportError::InvalidState {
            state: ConnectionState::Closing,
        };
        assert_eq!(err.to_string(), "connection is closing, expected open");
    }

    #[test]
    fn connect_message_names_url() {
        let err = TransportError::Connect {
            url: "ws://localhost:8900".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "connect to ws://localhost:8900 failed: connection refused"
        );
    }
}
