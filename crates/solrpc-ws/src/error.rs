//! Error types for the subscription multiplexer.

use serde_json::Value;
use thiserror::Error;

use solrpc_core::{JsonRpcError, TransportError};

use crate::client::ClientState;

/// Failure detail carried by a subscription's `StatusChanged` event.
///
/// These never propagate out of the receive loop; they are delivered to the
/// affected subscription only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubscriptionError {
    /// The client was closed locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport failed or the peer closed the connection.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The node answered the subscribe/unsubscribe request with an error.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The node confirmed with a result of the wrong shape.
    #[error("unexpected result in confirmation: {0}")]
    UnexpectedResult(Value),

    /// The node acknowledged an unsubscribe with `false`.
    #[error("unsubscribe rejected by node")]
    UnsubscribeRejected,

    /// A notification payload did not match the subscription's result type.
    #[error("failed to decode notification: {0}")]
    Decode(String),

    /// The notification callback panicked.
    #[error("notification callback panicked")]
    CallbackPanicked,

    /// Writing the request to the transport failed.
    #[error("failed to send request: {0}")]
    Send(String),

    /// The subscription was already unsubscribed.
    #[error("subscription was unsubscribed")]
    Unsubscribed,

    /// The node confirmed another subscription with this server id.
    #[error("server subscription id {0} was reassigned")]
    ServerIdReassigned(u64),
}

impl SubscriptionError {
    /// Returns `true` for connection-level failures.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::ConnectionLost(_))
    }
}

/// Errors returned from client API calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client is not in the `Connected` state.
    #[error("client is not connected (state: {0})")]
    NotConnected(ClientState),

    /// `init` was called more than once.
    #[error("client already initialised (state: {0})")]
    AlreadyInitialised(ClientState),

    /// The correlation id is still awaiting a response.
    #[error("correlation id {0} is still awaiting a response")]
    CorrelationInUse(u64),

    /// A request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport reported an error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors() {
        assert!(SubscriptionError::ConnectionClosed.is_connection_error());
        assert!(SubscriptionError::ConnectionLost("reset".into()).is_connection_error());
        assert!(!SubscriptionError::UnsubscribeRejected.is_connection_error());
    }

    #[test]
    fn rpc_error_display() {
        let err = SubscriptionError::Rpc(JsonRpcError {
            code: -32602,
            message: "Invalid param: WrongSize".into(),
            data: None,
        });
        assert_eq!(err.to_string(), "RPC error -32602: Invalid param: WrongSize");
    }
}
