//! `DuplexTransport` over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use solrpc_core::{ConnectionState, DuplexTransport, Frame, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport.
///
/// tungstenite already joins fragmented WebSocket messages, so every text or
/// binary message surfaces as one final frame. Ping/pong is handled by the
/// library and never reaches the caller.
pub struct WsTransport {
    sink: tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: tokio::sync::Mutex<Option<SplitStream<WsStream>>>,
    /// Outbound fragments waiting for their final frame.
    outbound: parking_lot::Mutex<Vec<u8>>,
    state: parking_lot::Mutex<ConnectionState>,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            sink: tokio::sync::Mutex::new(None),
            stream: tokio::sync::Mutex::new(None),
            outbound: parking_lot::Mutex::new(Vec::new()),
            state: parking_lot::Mutex::new(ConnectionState::Closed),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl DuplexTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        self.set_state(ConnectionState::Connecting);
        let (ws, _) = match tokio_tungstenite::connect_async(url).await {
            Ok(conn) => conn,
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.set_state(ConnectionState::Open);
        Ok(())
    }

    async fn send(&self, data: &[u8], is_final: bool) -> Result<(), TransportError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(TransportError::InvalidState { state });
        }

        let payload = {
            let mut outbound = self.outbound.lock();
            outbound.extend_from_slice(data);
            if !is_final {
                return Ok(());
            }
            std::mem::take(&mut *outbound)
        };
        let msg = match String::from_utf8(payload) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::Closed)?;
        sink.send(msg)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn receive(&self) -> Result<Option<Frame>, TransportError> {
        let mut stream = self.stream.lock().await;
        let Some(stream) = stream.as_mut() else {
            return Ok(None);
        };
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Frame::whole(text.into_bytes()))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::whole(data))),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "WS close frame received");
                    self.set_state(ConnectionState::Closed);
                    return Ok(None);
                }
                // ping / pong / raw frame
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => {
                    self.set_state(ConnectionState::Closed);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.set_state(ConnectionState::Closed);
                    return Err(TransportError::WebSocket(e.to_string()));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.set_state(ConnectionState::Closing);
        let sink = self.sink.lock().await.take();
        let result = match sink {
            Some(mut sink) => {
                let sent = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                sent.map_err(|e| TransportError::WebSocket(e.to_string()))
            }
            None => Ok(()),
        };
        self.set_state(ConnectionState::Closed);
        result
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}
