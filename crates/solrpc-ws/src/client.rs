//! Streaming JSON-RPC client: connection lifecycle, the single receive
//! loop, and the serialized send path.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use solrpc_core::{DuplexTransport, JsonRpcRequest, TransportError};

use crate::config::WsClientConfig;
use crate::dispatch::{Dispatcher, NotificationHandler, TypedHandler};
use crate::error::{ClientError, SubscriptionError};
use crate::message::{classify, Inbound};
use crate::reassembler::FrameReassembler;
use crate::registry::SubscriptionRegistry;
use crate::subscription::{emit_all, Subscription};
use crate::ws_transport::WsTransport;

/// Lifecycle state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// State shared between the client handle, its subscriptions (weakly) and
/// the receive loop.
pub(crate) struct ClientShared {
    url: String,
    config: WsClientConfig,
    transport: Arc<dyn DuplexTransport>,
    registry: Arc<SubscriptionRegistry>,
    state: Mutex<ClientState>,
    /// Single-writer discipline for outbound frames.
    writer: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

/// WebSocket JSON-RPC subscription client.
///
/// Multiplexes any number of subscriptions over one connection. A single
/// background receive loop reads frames, reassembles and classifies
/// messages, confirms pending requests and dispatches notifications.
///
/// In [`CallbackMode::Inline`](crate::CallbackMode::Inline) notification
/// callbacks run on that loop: a slow callback stalls every subscription on
/// the connection. Use a worker pool when callbacks do real work.
pub struct WsStreamClient {
    shared: Arc<ClientShared>,
}

impl WsStreamClient {
    /// Build a client over `transport`. Nothing happens until [`init`](Self::init).
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn DuplexTransport>,
        config: WsClientConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(ClientShared {
                url: url.into(),
                config,
                transport,
                registry: Arc::new(SubscriptionRegistry::new()),
                state: Mutex::new(ClientState::Disconnected),
                writer: tokio::sync::Mutex::new(()),
                shutdown,
                receive_task: Mutex::new(None),
            }),
        }
    }

    /// Connect to `url` over WebSocket and start the receive loop.
    pub async fn connect(url: impl Into<String>, config: WsClientConfig) -> Result<Self, ClientError> {
        let client = Self::new(url, Arc::new(WsTransport::new()), config);
        client.init().await?;
        Ok(client)
    }

    /// Establish the transport connection and start the receive loop.
    ///
    /// Fails fatally if the transport cannot connect; no retry is attempted.
    pub async fn init(&self) -> Result<(), ClientError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if *state != ClientState::Disconnected {
                return Err(ClientError::AlreadyInitialised(*state));
            }
            *state = ClientState::Connecting;
        }

        tracing::info!(url = %shared.url, "connecting via WebSocket");
        if let Err(e) = shared.transport.connect(&shared.url).await {
            tracing::warn!(url = %shared.url, error = %e, "WS connect failed");
            shared.set_state(ClientState::Closed);
            emit_all(shared.registry.fail_all(SubscriptionError::ConnectionClosed));
            return Err(e.into());
        }

        let shutdown = shared.shutdown.subscribe();
        let aborted = {
            let mut state = shared.state.lock();
            if *state == ClientState::Connecting {
                *state = ClientState::Connected;
                let handle = tokio::spawn(receive_loop(Arc::clone(shared), shutdown));
                *shared.receive_task.lock() = Some(handle);
                None
            } else {
                Some(*state)
            }
        };
        // `close` ran while the connect was in flight and has already failed
        // every subscription; release the connection it could not reach.
        if let Some(current) = aborted {
            tracing::info!(url = %shared.url, state = %current, "client closed during connect");
            if let Err(e) = shared.transport.close().await {
                tracing::debug!(error = %e, "transport close after aborted connect failed");
            }
            return Err(ClientError::NotConnected(ClientState::Closed));
        }
        tracing::info!(url = %shared.url, "WS connected");
        Ok(())
    }

    /// Subscribe to `channel`, decoding each notification into `T`.
    ///
    /// Sends `<channel>Subscribe` and returns at once with a `Pending`
    /// handle; the confirmation arrives asynchronously and is observable via
    /// [`Subscription::on_status_changed`] or [`Subscription::confirmed`].
    pub async fn subscribe<T, F>(
        &self,
        channel: &str,
        params: Vec<Value>,
        callback: F,
    ) -> Result<Subscription, ClientError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&Subscription, T) + Send + Sync + 'static,
    {
        self.subscribe_with(channel, params, TypedHandler::new(callback))
            .await
    }

    /// Subscribe with a custom [`NotificationHandler`].
    pub async fn subscribe_with<H>(
        &self,
        channel: &str,
        params: Vec<Value>,
        handler: H,
    ) -> Result<Subscription, ClientError>
    where
        H: NotificationHandler,
    {
        self.shared.subscribe(channel, params, Box::new(handler)).await
    }

    /// Unsubscribe `subscription`. A no-op unless it is `Subscribed`.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), ClientError> {
        self.shared.unsubscribe(subscription).await
    }

    /// Stop the receive loop and release the transport.
    ///
    /// Every subscription still live fails with
    /// [`SubscriptionError::ConnectionClosed`].
    pub async fn close(&self) -> Result<(), ClientError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            let current = *state;
            match current {
                ClientState::Closing | ClientState::Closed => return Ok(()),
                ClientState::Disconnected | ClientState::Connecting => {
                    *state = ClientState::Closed;
                    drop(state);
                    emit_all(shared.registry.fail_all(SubscriptionError::ConnectionClosed));
                    return Ok(());
                }
                ClientState::Connected => *state = ClientState::Closing,
            }
        }

        tracing::info!(url = %shared.url, "closing WS client");
        shared.shutdown.send_replace(true);
        let task = shared.receive_task.lock().take();
        if let Some(mut task) = task {
            let timeout = shared.config.close_timeout();
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "receive loop did not stop, aborting");
                task.abort();
            }
        }

        let result = shared.transport.close().await;
        emit_all(shared.registry.fail_all(SubscriptionError::ConnectionClosed));
        shared.set_state(ClientState::Closed);
        result.map_err(ClientError::from)
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.lock()
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Subscriptions currently in the active table.
    pub fn active_count(&self) -> usize {
        self.shared.registry.active_count()
    }

    /// Subscribe/unsubscribe requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.registry.pending_count()
    }
}

impl Drop for WsStreamClient {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

impl ClientShared {
    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        match *self.state.lock() {
            ClientState::Connected => Ok(()),
            other => Err(ClientError::NotConnected(other)),
        }
    }

    async fn send_request(&self, req: &JsonRpcRequest) -> Result<(), ClientError> {
        let bytes = serde_json::to_vec(req)?;
        let _writer = self.writer.lock().await;
        self.transport.send(&bytes, true).await?;
        Ok(())
    }

    async fn subscribe(
        self: &Arc<Self>,
        channel: &str,
        params: Vec<Value>,
        handler: Box<dyn NotificationHandler>,
    ) -> Result<Subscription, ClientError> {
        self.ensure_connected()?;

        let id = self.registry.next_correlation_id();
        let req = JsonRpcRequest::new(id, format!("{channel}Subscribe"), params.clone());
        let subscription = Subscription::new(id, channel, params, handler, Arc::downgrade(self));
        self.registry.register_subscribe(&subscription)?;

        tracing::debug!(id, channel, "sending subscribe");
        if let Err(e) = self.send_request(&req).await {
            tracing::warn!(id, channel, error = %e, "subscribe send failed");
            emit_all(self.registry.abort(id, SubscriptionError::Send(e.to_string())));
            return Err(e);
        }
        Ok(subscription)
    }

    pub(crate) async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), ClientError> {
        let Some(ticket) = self.registry.begin_unsubscribe(subscription) else {
            return Ok(());
        };
        emit_all(ticket.events);

        let req = JsonRpcRequest::new(
            ticket.correlation_id,
            format!("{}Unsubscribe", subscription.channel()),
            vec![Value::from(ticket.server_id)],
        );
        tracing::debug!(
            id = ticket.correlation_id,
            server_id = ticket.server_id,
            "sending unsubscribe"
        );
        if let Err(e) = self.send_request(&req).await {
            tracing::warn!(server_id = ticket.server_id, error = %e, "unsubscribe send failed");
            emit_all(
                self.registry
                    .abort(ticket.correlation_id, SubscriptionError::Send(e.to_string())),
            );
            return Err(e);
        }
        Ok(())
    }

    /// The receive loop is gone: fail everything and mark the client closed.
    async fn teardown(&self, error: SubscriptionError) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "transport close after receive loop exit failed");
        }
        emit_all(self.registry.fail_all(error));
        self.set_state(ClientState::Closed);
    }
}

/// Sole reader of the transport for the lifetime of the connection.
async fn receive_loop(shared: Arc<ClientShared>, mut shutdown: watch::Receiver<bool>) {
    let dispatcher = Dispatcher::new(Arc::clone(&shared.registry), shared.config.callbacks);
    let mut reassembler = FrameReassembler::new(shared.config.max_message_bytes);

    let exit = loop {
        let frame = tokio::select! {
            // Only ever flips to `true`.
            _ = shutdown.changed() => break SubscriptionError::ConnectionClosed,
            frame = shared.transport.receive() => frame,
        };

        match frame {
            Ok(Some(frame)) => match reassembler.push_frame(&frame) {
                None => {}
                Some(Ok(text)) => handle_message(&shared, &dispatcher, &text).await,
                Some(Err(e)) => tracing::warn!(error = %e, "discarding inbound message"),
            },
            Ok(None) => {
                tracing::warn!(url = %shared.url, "WS closed by peer");
                break SubscriptionError::ConnectionLost("closed by peer".into());
            }
            Err(e) => {
                tracing::warn!(url = %shared.url, error = %e, "WS receive error");
                break SubscriptionError::ConnectionLost(transport_reason(&e));
            }
        }
    };

    // A local close finishes the teardown itself.
    let closing = *shared.state.lock() == ClientState::Closing;
    if closing {
        return;
    }
    shared.teardown(exit).await;
    tracing::info!(url = %shared.url, "WS receive loop ended");
}

async fn handle_message(shared: &ClientShared, dispatcher: &Dispatcher, text: &str) {
    match classify(text) {
        Inbound::Response { id, outcome } => emit_all(shared.registry.complete(id, outcome)),
        Inbound::Notification {
            subscription,
            result,
            ..
        } => {
            dispatcher.dispatch(subscription, result).await;
        }
        Inbound::Anomaly(anomaly) => {
            tracing::debug!(%anomaly, "unroutable message dropped");
        }
    }
}

fn transport_reason(e: &TransportError) -> String {
    match e {
        TransportError::WebSocket(reason) => reason.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Debug for WsStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsStreamClient")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}
