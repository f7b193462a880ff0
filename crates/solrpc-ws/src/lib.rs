//! solrpc-ws: subscription multiplexer for the ledger's WebSocket JSON-RPC API.
//!
//! # Features
//! - Many typed subscriptions over one connection
//! - Frame reassembly independent of JSON message boundaries
//! - Per-subscription status events (`Pending → Subscribed → Unsubscribing → Unsubscribed`)
//! - Idempotent unsubscribe; late notifications are dropped silently
//! - Inline callbacks or a bounded, order-preserving worker pool
//! - Scripted transport for deterministic tests
//!
//! ```no_run
//! # async fn demo() -> Result<(), solrpc_ws::ClientError> {
//! use solrpc_ws::{SubscribeConfig, WsClientConfig, WsStreamClient};
//!
//! let client = WsStreamClient::connect("wss://api.mainnet-beta.solana.com", WsClientConfig::default()).await?;
//! let sub = client
//!     .account_subscribe("CM78CPUeXjn8o3yroDHxUtKsZZgoy4GPkPPXfouKNH12", SubscribeConfig::default(), |_, update| {
//!         println!("lamports: {}", update.value.lamports);
//!     })
//!     .await?;
//! sub.on_status_changed(|_, change| println!("{} -> {}", change.previous, change.status));
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod reassembler;
mod registry;
pub mod subscription;
pub mod testing;
pub mod types;
pub mod ws_transport;

pub use client::{ClientState, WsStreamClient};
pub use config::{CallbackMode, WsClientConfig};
pub use dispatch::{NotificationHandler, TypedHandler};
pub use error::{ClientError, SubscriptionError};
pub use message::{classify, Anomaly, Inbound};
pub use reassembler::{FrameReassembler, ReassemblyError};
pub use subscription::{StatusChanged, Subscription, SubscriptionStatus};
pub use types::{
    AccountInfo, Commitment, Encoding, KeyedAccount, LogsFilter, LogsNotification, RpcContext,
    RpcResponse, SignatureResult, SlotInfo, SubscribeConfig,
};
pub use ws_transport::WsTransport;
