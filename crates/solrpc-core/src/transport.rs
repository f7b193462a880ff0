//! The `DuplexTransport` trait: the frame-level abstraction the streaming
//! client is written against.

use async_trait::async_trait;

use crate::error::TransportError;

/// Observable state of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `connect` is in progress.
    Connecting,
    /// Frames can be sent and received.
    Open,
    /// A close has been requested but not yet completed.
    Closing,
    /// Not connected (never opened, closed, or failed).
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One transport-level unit of data.
///
/// A logical message may span several frames; `is_final` marks the last one.
/// Frame boundaries carry no meaning beyond that flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub is_final: bool,
}

impl Frame {
    /// A frame holding a whole message.
    pub fn whole(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            is_final: true,
        }
    }

    /// A non-final fragment of a larger message.
    pub fn partial(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            is_final: false,
        }
    }
}

/// A duplex, frame-oriented connection.
///
/// # Concurrency
/// The client guarantees a single reader (`receive` is only ever called by
/// the receive loop) and serializes all `send` calls behind its own writer
/// lock, so implementations only need to tolerate one `receive` running
/// concurrently with one `send`.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn DuplexTransport>`.
#[async_trait]
pub trait DuplexTransport: Send + Sync + 'static {
    /// Establish the connection to `url`.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, data: &[u8], is_final: bool) -> Result<(), TransportError>;

    /// Wait for the next inbound frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn receive(&self) -> Result<Option<Frame>, TransportError>;

    /// Close the connection. Closing an already closed transport is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_constructors() {
        let f = Frame::whole("{}");
        assert!(f.is_final);
        assert_eq!(f.data, b"{}");

        let p = Frame::partial(Vec::new());
        assert!(!p.is_final);
        assert!(p.data.is_empty());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
