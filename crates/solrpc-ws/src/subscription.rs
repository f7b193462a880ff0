//! The subscription handle and its status state machine.
//!
//! ```text
//! Pending ──confirm──▶ Subscribed ──unsubscribe──▶ Unsubscribing ──ack──▶ Unsubscribed
//!    │                     │  ▲                         │
//!    │                     │  └────────rejected─────────┘
//!    └──error──▶ Failed ◀──┴──── connection closed ─────┘
//! ```
//!
//! `Unsubscribed` and `Failed` are terminal.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::client::{ClientShared, ClientState};
use crate::dispatch::NotificationHandler;
use crate::error::{ClientError, SubscriptionError};

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    /// Request sent, confirmation not yet seen.
    Pending,
    /// Confirmed; notifications are delivered.
    Subscribed,
    /// Unsubscribe sent, acknowledgement not yet seen.
    Unsubscribing,
    /// Unsubscribe acknowledged.
    Unsubscribed,
    /// Rejected by the node or lost with the connection.
    Failed,
}

impl SubscriptionStatus {
    /// `Unsubscribed` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unsubscribed | Self::Failed)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Unsubscribing => write!(f, "unsubscribing"),
            Self::Unsubscribed => write!(f, "unsubscribed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Raised on every status transition, and on non-fatal faults such as a
/// notification that failed to decode (then `previous == status`).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChanged {
    pub previous: SubscriptionStatus,
    pub status: SubscriptionStatus,
    pub error: Option<SubscriptionError>,
}

type StatusHandler = Arc<dyn Fn(&Subscription, &StatusChanged) + Send + Sync>;

pub(crate) type StatusEvents = Vec<(Subscription, StatusChanged)>;

struct SubState {
    status: SubscriptionStatus,
    /// Set once on confirmation, never changed afterwards.
    server_id: Option<u64>,
    last_error: Option<SubscriptionError>,
}

/// Events waiting for delivery, in transition order.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<StatusChanged>,
    /// Some task is currently delivering from `queue`.
    draining: bool,
}

struct Inner {
    correlation_id: u64,
    channel: String,
    params: Vec<Value>,
    state: Mutex<SubState>,
    outbox: Mutex<Outbox>,
    handlers: Mutex<Vec<StatusHandler>>,
    status_tx: watch::Sender<SubscriptionStatus>,
    handler: Box<dyn NotificationHandler>,
    client: Weak<ClientShared>,
}

/// Handle to one logical subscription.
///
/// Cheap to clone; all clones refer to the same subscription. The registry
/// owns the state, the application only observes it.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    pub(crate) fn new(
        correlation_id: u64,
        channel: impl Into<String>,
        params: Vec<Value>,
        handler: Box<dyn NotificationHandler>,
        client: Weak<ClientShared>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SubscriptionStatus::Pending);
        Self {
            inner: Arc::new(Inner {
                correlation_id,
                channel: channel.into(),
                params,
                state: Mutex::new(SubState {
                    status: SubscriptionStatus::Pending,
                    server_id: None,
                    last_error: None,
                }),
                outbox: Mutex::new(Outbox::default()),
                handlers: Mutex::new(Vec::new()),
                status_tx,
                handler,
                client,
            }),
        }
    }

    /// Id of the subscribe request that created this subscription.
    pub fn correlation_id(&self) -> u64 {
        self.inner.correlation_id
    }

    /// Notification channel, e.g. `"account"`.
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Parameters sent with the subscribe request.
    pub fn params(&self) -> &[Value] {
        &self.inner.params
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.inner.state.lock().status
    }

    /// Server-assigned id; present only while `Subscribed` or `Unsubscribing`.
    pub fn server_id(&self) -> Option<u64> {
        let state = self.inner.state.lock();
        match state.status {
            SubscriptionStatus::Subscribed | SubscriptionStatus::Unsubscribing => state.server_id,
            _ => None,
        }
    }

    /// The most recent error reported for this subscription.
    pub fn last_error(&self) -> Option<SubscriptionError> {
        self.inner.state.lock().last_error.clone()
    }

    /// Register an observer for status changes.
    ///
    /// Events are delivered exactly in transition order. Observers run on
    /// whichever task delivers them: usually the receive loop, sometimes a
    /// task calling `unsubscribe`. They must not block.
    pub fn on_status_changed<F>(&self, handler: F)
    where
        F: Fn(&Subscription, &StatusChanged) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().push(Arc::new(handler));
    }

    /// A watch receiver tracking the current status.
    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Wait until the status satisfies `pred`.
    pub async fn wait_for_status<P>(&self, mut pred: P) -> SubscriptionStatus
    where
        P: FnMut(SubscriptionStatus) -> bool,
    {
        let mut rx = self.watch_status();
        let status = match rx.wait_for(|s| pred(*s)).await {
            Ok(status) => *status,
            // The sender lives in `inner`, which `self` keeps alive.
            Err(_) => self.status(),
        };
        status
    }

    /// Wait for the subscribe confirmation and return the server id.
    ///
    /// Resolves to `Ok` only while the subscription is live (`Subscribed` or
    /// `Unsubscribing`); once it has failed or been unsubscribed, the last
    /// error is returned instead.
    pub async fn confirmed(&self) -> Result<u64, SubscriptionError> {
        self.wait_for_status(|s| s != SubscriptionStatus::Pending)
            .await;
        let state = self.inner.state.lock();
        match (state.status, state.server_id) {
            (SubscriptionStatus::Subscribed | SubscriptionStatus::Unsubscribing, Some(id)) => Ok(id),
            (SubscriptionStatus::Unsubscribed, _) => Err(SubscriptionError::Unsubscribed),
            _ => Err(state
                .last_error
                .clone()
                .unwrap_or(SubscriptionError::ConnectionClosed)),
        }
    }

    /// Unsubscribe. A no-op unless the subscription is `Subscribed`.
    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        if self.status() != SubscriptionStatus::Subscribed {
            return Ok(());
        }
        let Some(client) = self.inner.client.upgrade() else {
            return Err(ClientError::NotConnected(ClientState::Closed));
        };
        client.unsubscribe(self).await
    }

    /// Returns `true` if both handles refer to the same subscription.
    pub fn same_as(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Move to `to`. Returns the event to emit, or `None` if the
    /// subscription is already terminal or nothing changed.
    pub(crate) fn transition(
        &self,
        to: SubscriptionStatus,
        server_id: Option<u64>,
        error: Option<SubscriptionError>,
    ) -> Option<StatusChanged> {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() || (state.status == to && error.is_none()) {
            return None;
        }
        let previous = state.status;
        state.status = to;
        if state.server_id.is_none() {
            state.server_id = server_id;
        }
        if error.is_some() {
            state.last_error = error.clone();
        }
        let event = StatusChanged {
            previous,
            status: to,
            error,
        };
        self.inner.outbox.lock().queue.push_back(event.clone());
        Some(event)
    }

    /// Record a non-fatal error without changing status.
    pub(crate) fn fault(&self, error: SubscriptionError) -> Option<StatusChanged> {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            return None;
        }
        state.last_error = Some(error.clone());
        let event = StatusChanged {
            previous: state.status,
            status: state.status,
            error: Some(error),
        };
        self.inner.outbox.lock().queue.push_back(event.clone());
        Some(event)
    }

    /// Decode `payload` and hand it to the notification callback.
    pub(crate) fn handle_raw(&self, payload: Value) -> Result<(), serde_json::Error> {
        self.inner.handler.handle_raw(self, payload)
    }

    /// Deliver queued events to the observers, then publish each status on
    /// the watch channel. Returns at once if another task is delivering; that
    /// task picks up anything queued meanwhile.
    pub(crate) fn flush_events(&self) {
        {
            let mut outbox = self.inner.outbox.lock();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let event = {
                let mut outbox = self.inner.outbox.lock();
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            let handlers: Vec<StatusHandler> = self.inner.handlers.lock().clone();
            for handler in handlers {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(self, &event))).is_err() {
                    tracing::warn!(
                        id = self.inner.correlation_id,
                        channel = %self.inner.channel,
                        "status observer panicked"
                    );
                }
            }
            self.inner.status_tx.send_replace(event.status);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Subscription")
            .field("correlation_id", &self.inner.correlation_id)
            .field("channel", &self.inner.channel)
            .field("status", &state.status)
            .field("server_id", &state.server_id)
            .finish()
    }
}

/// Deliver the queued events of every subscription in `events`. Must be
/// called without the registry lock held.
pub(crate) fn emit_all(events: StatusEvents) {
    for (subscription, _) in events {
        subscription.flush_events();
    }
}
