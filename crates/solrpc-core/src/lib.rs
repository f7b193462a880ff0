//! solrpc-core: foundation traits and types for SolRPC.
//!
//! # Overview
//!
//! SolRPC is a client SDK for a ledger node's JSON-RPC API. The streaming
//! side multiplexes many long-lived subscriptions over one duplex
//! connection. The core crate defines:
//!
//! - [`DuplexTransport`]: the frame-level async trait every streaming
//!   transport implements (WebSocket in production, scripted in tests)
//! - [`JsonRpcRequest`] / [`JsonRpcError`]: wire types
//! - [`TransportError`]: structured error type
//! - [`ConnectionState`]: observable state of the physical connection

pub mod error;
pub mod request;
pub mod transport;

pub use error::TransportError;
pub use request::{JsonRpcError, JsonRpcRequest};
pub use transport::{ConnectionState, DuplexTransport, Frame};
