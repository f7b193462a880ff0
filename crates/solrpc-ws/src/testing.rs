//! Scripted transport for deterministic tests.
//!
//! Inbound frames are queued from the test through a [`ScriptHandle`] and
//! handed to the receive loop strictly in order, which makes races between
//! confirmations and notifications reproducible.
//!
//! ```no_run
//! # async fn demo() {
//! use std::sync::Arc;
//! use solrpc_ws::testing::ScriptedTransport;
//! use solrpc_ws::{WsClientConfig, WsStreamClient};
//!
//! let (transport, script) = ScriptedTransport::new();
//! let client = WsStreamClient::new("ws://scripted", transport, WsClientConfig::default());
//! client.init().await.unwrap();
//! script.push_text(r#"{"jsonrpc":"2.0","id":1,"result":23784}"#);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use solrpc_core::{ConnectionState, DuplexTransport, Frame, TransportError};

enum Scripted {
    Frame(Frame),
    Error(String),
    Eof,
}

struct ScriptState {
    state: Mutex<ConnectionState>,
    connected_url: Mutex<Option<String>>,
    connect_error: Mutex<Option<String>>,
    /// While set, `connect` parks until the gate is released.
    connect_gate: Mutex<Option<Arc<Notify>>>,
    /// While set, every `send` fails with this reason.
    send_error: Mutex<Option<String>>,
    partial: Mutex<Vec<u8>>,
    sent: Mutex<Vec<Vec<u8>>>,
    sent_notify: Notify,
}

/// In-memory [`DuplexTransport`] fed by a [`ScriptHandle`].
pub struct ScriptedTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>,
    shared: Arc<ScriptState>,
}

/// Test-side controls for a [`ScriptedTransport`].
#[derive(Clone)]
pub struct ScriptHandle {
    tx: mpsc::UnboundedSender<Scripted>,
    shared: Arc<ScriptState>,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, ScriptHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ScriptState {
            state: Mutex::new(ConnectionState::Closed),
            connected_url: Mutex::new(None),
            connect_error: Mutex::new(None),
            connect_gate: Mutex::new(None),
            send_error: Mutex::new(None),
            partial: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
        });
        let transport = Arc::new(Self {
            inbound: tokio::sync::Mutex::new(rx),
            shared: Arc::clone(&shared),
        });
        (transport, ScriptHandle { tx, shared })
    }
}

#[async_trait]
impl DuplexTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let gate = self.shared.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(reason) = self.shared.connect_error.lock().take() {
            *self.shared.state.lock() = ConnectionState::Closed;
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason,
            });
        }
        *self.shared.connected_url.lock() = Some(url.to_string());
        *self.shared.state.lock() = ConnectionState::Open;
        Ok(())
    }

    async fn send(&self, data: &[u8], is_final: bool) -> Result<(), TransportError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(TransportError::InvalidState { state });
        }
        if let Some(reason) = self.shared.send_error.lock().clone() {
            return Err(TransportError::WebSocket(reason));
        }
        let mut partial = self.shared.partial.lock();
        partial.extend_from_slice(data);
        if is_final {
            let message = std::mem::take(&mut *partial);
            self.shared.sent.lock().push(message);
            self.shared.sent_notify.notify_waiters();
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Frame>, TransportError> {
        let next = self.inbound.lock().await.recv().await;
        match next {
            Some(Scripted::Frame(frame)) => Ok(Some(frame)),
            Some(Scripted::Error(reason)) => {
                *self.shared.state.lock() = ConnectionState::Closed;
                Err(TransportError::WebSocket(reason))
            }
            Some(Scripted::Eof) | None => {
                *self.shared.state.lock() = ConnectionState::Closed;
                Ok(None)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        *self.shared.state.lock() = ConnectionState::Closed;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }
}

impl ScriptHandle {
    /// Queue one whole text message.
    pub fn push_text(&self, text: &str) {
        self.push_frame(Frame::whole(text.as_bytes()));
    }

    /// Queue a JSON value as one whole message.
    pub fn push_json(&self, value: &Value) {
        self.push_text(&value.to_string());
    }

    /// Queue `text` split into `chunk`-byte frames, with an empty frame
    /// between every pair of fragments.
    pub fn push_fragments(&self, text: &str, chunk: usize) {
        let bytes = text.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(chunk.max(1)).collect();
        for (i, part) in chunks.iter().enumerate() {
            let last = i + 1 == chunks.len();
            self.push_frame(Frame {
                data: part.to_vec(),
                is_final: last,
            });
            if !last {
                self.push_frame(Frame::partial(Vec::new()));
            }
        }
    }

    /// Queue a raw frame.
    pub fn push_frame(&self, frame: Frame) {
        let _ = self.tx.send(Scripted::Frame(frame));
    }

    /// Make the next `receive` fail with a WebSocket error.
    pub fn push_error(&self, reason: &str) {
        let _ = self.tx.send(Scripted::Error(reason.to_string()));
    }

    /// Make the next `receive` report a peer close.
    pub fn close_remote(&self) {
        let _ = self.tx.send(Scripted::Eof);
    }

    /// Make the next `connect` fail.
    pub fn fail_next_connect(&self, reason: &str) {
        *self.shared.connect_error.lock() = Some(reason.to_string());
    }

    /// Park every `connect` until [`release_connect`](Self::release_connect).
    pub fn hold_connect(&self) {
        *self.shared.connect_gate.lock() = Some(Arc::new(Notify::new()));
    }

    /// Let a held `connect` finish.
    pub fn release_connect(&self) {
        if let Some(gate) = self.shared.connect_gate.lock().take() {
            // Stores a permit if `connect` is not parked yet.
            gate.notify_one();
        }
    }

    /// Fail every `send` until [`restore_sends`](Self::restore_sends).
    pub fn fail_sends(&self, reason: &str) {
        *self.shared.send_error.lock() = Some(reason.to_string());
    }

    pub fn restore_sends(&self) {
        *self.shared.send_error.lock() = None;
    }

    /// URL passed to the last successful `connect`.
    pub fn connected_url(&self) -> Option<String> {
        self.shared.connected_url.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Every complete outbound message, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.shared
            .sent
            .lock()
            .iter()
            .map(|m| serde_json::from_slice(m).unwrap_or(Value::Null))
            .collect()
    }

    /// Wait until at least `n` messages were sent; gives up after five seconds.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<Value> {
        let wait = async {
            loop {
                let notified = self.shared.sent_notify.notified();
                if self.shared.sent.lock().len() >= n {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(5), wait).await;
        self.sent()
    }
}
