//! Subscription registry: pending and active tables plus the protocol state
//! machine that moves subscriptions between them.
//!
//! One lock guards both tables and every status transition, so "is this
//! still pending?" and "promote it" can never interleave with another
//! mutation. Events are returned to the caller and emitted after the lock is
//! released, which lets observers call back into the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use solrpc_core::JsonRpcError;

use crate::client::ClientState;
use crate::error::{ClientError, SubscriptionError};
use crate::subscription::{StatusEvents, Subscription, SubscriptionStatus};

/// What an outstanding request will do once answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Subscribe,
    Unsubscribe { server_id: u64 },
}

/// Links an outbound correlation id to the subscription it creates or tears down.
pub(crate) struct PendingRequest {
    pub kind: PendingKind,
    pub subscription: Subscription,
}

/// Returned by [`SubscriptionRegistry::begin_unsubscribe`].
pub(crate) struct UnsubscribeTicket {
    pub correlation_id: u64,
    pub server_id: u64,
    pub events: StatusEvents,
}

#[derive(Default)]
struct Tables {
    pending: HashMap<u64, PendingRequest>,
    active: HashMap<u64, Subscription>,
    /// Set once the connection is gone; nothing new is admitted.
    closed: bool,
}

pub(crate) struct SubscriptionRegistry {
    next_id: AtomicU64,
    tables: Mutex<Tables>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Allocate a fresh, monotonically increasing correlation id.
    pub(crate) fn next_correlation_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Park a new `Pending` subscription under its correlation id.
    pub(crate) fn register_subscribe(&self, subscription: &Subscription) -> Result<(), ClientError> {
        let mut tables = self.tables.lock();
        if tables.closed {
            return Err(ClientError::NotConnected(ClientState::Closed));
        }
        let id = subscription.correlation_id();
        if tables.pending.contains_key(&id) {
            return Err(ClientError::CorrelationInUse(id));
        }
        tables.pending.insert(
            id,
            PendingRequest {
                kind: PendingKind::Subscribe,
                subscription: subscription.clone(),
            },
        );
        Ok(())
    }

    /// Move a `Subscribed` subscription to `Unsubscribing` and park the
    /// unsubscribe request. `None` if the subscription is in any other state.
    pub(crate) fn begin_unsubscribe(&self, subscription: &Subscription) -> Option<UnsubscribeTicket> {
        let mut tables = self.tables.lock();
        if tables.closed || subscription.status() != SubscriptionStatus::Subscribed {
            return None;
        }
        let server_id = subscription.server_id()?;

        let mut correlation_id = self.next_correlation_id();
        while tables.pending.contains_key(&correlation_id) {
            correlation_id = self.next_correlation_id();
        }

        let event = subscription.transition(SubscriptionStatus::Unsubscribing, None, None)?;
        tables.pending.insert(
            correlation_id,
            PendingRequest {
                kind: PendingKind::Unsubscribe { server_id },
                subscription: subscription.clone(),
            },
        );
        Some(UnsubscribeTicket {
            correlation_id,
            server_id,
            events: vec![(subscription.clone(), event)],
        })
    }

    /// Withdraw a request whose send failed.
    pub(crate) fn abort(&self, correlation_id: u64, error: SubscriptionError) -> StatusEvents {
        let mut tables = self.tables.lock();
        let Some(req) = tables.pending.remove(&correlation_id) else {
            return Vec::new();
        };
        let sub = req.subscription;
        let event = match req.kind {
            PendingKind::Subscribe => sub.transition(SubscriptionStatus::Failed, None, Some(error)),
            PendingKind::Unsubscribe { .. } if sub.status() == SubscriptionStatus::Unsubscribing => {
                sub.transition(SubscriptionStatus::Subscribed, None, Some(error))
            }
            PendingKind::Unsubscribe { .. } => None,
        };
        event.map(|e| vec![(sub, e)]).unwrap_or_default()
    }

    /// Apply a correlation response.
    pub(crate) fn complete(
        &self,
        correlation_id: u64,
        outcome: Result<Value, JsonRpcError>,
    ) -> StatusEvents {
        let mut tables = self.tables.lock();
        let Some(req) = tables.pending.remove(&correlation_id) else {
            tracing::debug!(id = correlation_id, "response for unknown request id dropped");
            return Vec::new();
        };

        let mut events = Vec::new();
        let sub = req.subscription;
        match req.kind {
            PendingKind::Subscribe => {
                let (to, server_id, error) = match outcome {
                    Ok(result) => match result.as_u64() {
                        Some(server_id) => (SubscriptionStatus::Subscribed, Some(server_id), None),
                        None => (
                            SubscriptionStatus::Failed,
                            None,
                            Some(SubscriptionError::UnexpectedResult(result)),
                        ),
                    },
                    Err(err) => (SubscriptionStatus::Failed, None, Some(SubscriptionError::Rpc(err))),
                };

                if let Some(server_id) = server_id {
                    if let Some(displaced) = tables.active.remove(&server_id) {
                        tracing::warn!(server_id, "server reassigned a live subscription id");
                        if let Some(e) = displaced.transition(
                            SubscriptionStatus::Failed,
                            None,
                            Some(SubscriptionError::ServerIdReassigned(server_id)),
                        ) {
                            events.push((displaced, e));
                        }
                    }
                }

                if let Some(event) = sub.transition(to, server_id, error) {
                    match server_id {
                        Some(server_id) => {
                            tracing::debug!(
                                id = correlation_id,
                                server_id,
                                channel = sub.channel(),
                                "subscription confirmed"
                            );
                            tables.active.insert(server_id, sub.clone());
                        }
                        None => {
                            tracing::debug!(
                                id = correlation_id,
                                channel = sub.channel(),
                                "subscription rejected"
                            );
                        }
                    }
                    events.push((sub, event));
                }
            }
            PendingKind::Unsubscribe { server_id } => {
                let (to, error) = match outcome {
                    Ok(Value::Bool(true)) => (SubscriptionStatus::Unsubscribed, None),
                    Ok(Value::Bool(false)) => (
                        SubscriptionStatus::Subscribed,
                        Some(SubscriptionError::UnsubscribeRejected),
                    ),
                    Ok(other) => (
                        SubscriptionStatus::Subscribed,
                        Some(SubscriptionError::UnexpectedResult(other)),
                    ),
                    Err(err) => (SubscriptionStatus::Subscribed, Some(SubscriptionError::Rpc(err))),
                };

                if sub.status() != SubscriptionStatus::Unsubscribing {
                    return events;
                }
                if to == SubscriptionStatus::Unsubscribed
                    && tables
                        .active
                        .get(&server_id)
                        .is_some_and(|s| s.same_as(&sub))
                {
                    tables.active.remove(&server_id);
                }
                if let Some(event) = sub.transition(to, None, error) {
                    tracing::debug!(id = correlation_id, server_id, status = %to, "unsubscribe answered");
                    events.push((sub, event));
                }
            }
        }
        events
    }

    /// The subscription that should receive notifications for `server_id`.
    pub(crate) fn route(&self, server_id: u64) -> Option<Subscription> {
        self.tables
            .lock()
            .active
            .get(&server_id)
            .filter(|s| s.status() == SubscriptionStatus::Subscribed)
            .cloned()
    }

    /// Fail every live subscription and refuse new ones.
    pub(crate) fn fail_all(&self, error: SubscriptionError) -> StatusEvents {
        let mut tables = self.tables.lock();
        tables.closed = true;
        let mut subs: Vec<Subscription> = tables
            .pending
            .drain()
            .map(|(_, req)| req.subscription)
            .collect();
        subs.extend(tables.active.drain().map(|(_, sub)| sub));

        let mut events = Vec::new();
        for sub in subs {
            if let Some(event) = sub.transition(SubscriptionStatus::Failed, None, Some(error.clone())) {
                events.push((sub, event));
            }
        }
        events
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.tables.lock().pending.len()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.tables.lock().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TypedHandler;
    use serde_json::json;
    use std::sync::Weak;

    fn new_sub(registry: &SubscriptionRegistry, channel: &str) -> Subscription {
        let sub = Subscription::new(
            registry.next_correlation_id(),
            channel,
            vec![],
            Box::new(TypedHandler::new(|_: &Subscription, _: Value| {})),
            Weak::new(),
        );
        registry.register_subscribe(&sub).unwrap();
        sub
    }

    fn rpc_error() -> JsonRpcError {
        JsonRpcError {
            code: -32602,
            message: "Invalid param".into(),
            data: None,
        }
    }

    #[test]
    fn correlation_ids_are_distinct() {
        let registry = SubscriptionRegistry::new();
        let ids: Vec<u64> = (0..100).map(|_| registry.next_correlation_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], 1);
    }

    #[test]
    fn duplicate_correlation_id_rejected() {
        let registry = SubscriptionRegistry::new();
        let sub = new_sub(&registry, "slot");
        assert!(matches!(
            registry.register_subscribe(&sub),
            Err(ClientError::CorrelationInUse(1))
        ));
    }

    #[test]
    fn confirmation_promotes_to_active() {
        let registry = SubscriptionRegistry::new();
        let sub = new_sub(&registry, "account");

        let events = registry.complete(1, Ok(json!(23784)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.status, SubscriptionStatus::Subscribed);
        assert_eq!(sub.server_id(), Some(23784));
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.route(23784).unwrap().same_as(&sub));
    }

    #[test]
    fn error_confirmation_fails_without_active_entry() {
        let registry = SubscriptionRegistry::new();
        let sub = new_sub(&registry, "account");

        let events = registry.complete(1, Err(rpc_error()));
        assert_eq!(events[0].1.status, SubscriptionStatus::Failed);
        assert_eq!(sub.last_error(), Some(SubscriptionError::Rpc(rpc_error())));
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn non_numeric_confirmation_fails() {
        let registry = SubscriptionRegistry::new();
        let sub = new_sub(&registry, "account");
        registry.complete(1, Ok(json!("abc")));
        assert_eq!(sub.status(), SubscriptionStatus::Failed);
        assert_eq!(
            sub.last_error(),
            Some(SubscriptionError::UnexpectedResult(json!("abc")))
        );
    }

    #[test]
    fn unknown_response_is_dropped() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.complete(99, Ok(json!(1))).is_empty());
    }

    #[test]
    fn unsubscribe_round_trip() {
        let registry = SubscriptionRegistry::new();
        let sub = new_sub(&registry, "account");
        registry.complete(1, Ok(json!(5)));

        let ticket = registry.begin_unsubscribe(&sub).unwrap();
        assert_eq!(ticket.server_id, 5);
        assert_eq!(ticket.correlation_id, 2);
        assert_eq!(sub.status(), SubscriptionStatus::Unsubscribing);
        // Still mapped, but no longer routable.
        assert_eq!(registry.active_count(), 1);
        assert!(registry.route(5).is_none());
        // Second call is a no-op.
        assert!(registry.begin_unsubscribe(&sub).is_none());

        let events = registry.complete(2, Ok(json!(true)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.status, SubscriptionStatus::Unsubscribed);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.begin_unsubscribe(&sub).is_none());
    }

    #[test]
    fn rejected_unsubscribe_returns_to_subscribed() {
        let registry = SubscriptionRegistry::new();
        let sub = new_sub(&registry, "slot");
        registry.complete(1, Ok(json!(8)));

        let ticket = registry.begin_unsubscribe(&sub).unwrap();
        let events = registry.complete(ticket.correlation_id, Ok(json!(false)));
        assert_eq!(events[0].1.status, SubscriptionStatus::Subscribed);
        assert_eq!(events[0].1.error, Some(SubscriptionError::UnsubscribeRejected));
        assert!(registry.route(8).unwrap().same_as(&sub));

        let ticket = registry.begin_unsubscribe(&sub).unwrap();
        registry.complete(ticket.correlation_id, Err(rpc_error()));
        assert_eq!(sub.status(), SubscriptionStatus::Subscribed);
    }

    #[test]
    fn abort_reverts_or_fails() {
        let registry = SubscriptionRegistry::new();
        let pending = new_sub(&registry, "slot");
        let events = registry.abort(1, SubscriptionError::Send("broken pipe".into()));
        assert_eq!(events[0].1.status, SubscriptionStatus::Failed);
        assert_eq!(pending.status(), SubscriptionStatus::Failed);

        let live = new_sub(&registry, "slot");
        registry.complete(live.correlation_id(), Ok(json!(3)));
        let ticket = registry.begin_unsubscribe(&live).unwrap();
        registry.abort(ticket.correlation_id, SubscriptionError::Send("broken pipe".into()));
        assert_eq!(live.status(), SubscriptionStatus::Subscribed);
    }

    #[test]
    fn reassigned_server_id_fails_previous_holder() {
        let registry = SubscriptionRegistry::new();
        let first = new_sub(&registry, "slot");
        let second = new_sub(&registry, "slot");
        registry.complete(first.correlation_id(), Ok(json!(10)));
        let events = registry.complete(second.correlation_id(), Ok(json!(10)));

        assert_eq!(events.len(), 2);
        assert_eq!(first.status(), SubscriptionStatus::Failed);
        assert_eq!(first.last_error(), Some(SubscriptionError::ServerIdReassigned(10)));
        assert!(registry.route(10).unwrap().same_as(&second));
    }

    #[test]
    fn fail_all_fires_once_per_subscription() {
        let registry = SubscriptionRegistry::new();
        let pending = new_sub(&registry, "slot");
        let live = new_sub(&registry, "account");
        let leaving = new_sub(&registry, "logs");
        registry.complete(live.correlation_id(), Ok(json!(1)));
        registry.complete(leaving.correlation_id(), Ok(json!(2)));
        registry.begin_unsubscribe(&leaving).unwrap();

        let events = registry.fail_all(SubscriptionError::ConnectionClosed);
        assert_eq!(events.len(), 3);
        for sub in [&pending, &live, &leaving] {
            assert_eq!(sub.status(), SubscriptionStatus::Failed);
        }
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.active_count(), 0);

        let late = Subscription::new(
            registry.next_correlation_id(),
            "slot",
            vec![],
            Box::new(TypedHandler::new(|_: &Subscription, _: Value| {})),
            Weak::new(),
        );
        assert!(matches!(
            registry.register_subscribe(&late),
            Err(ClientError::NotConnected(ClientState::Closed))
        ));
        assert!(registry.fail_all(SubscriptionError::ConnectionClosed).is_empty());
    }
}
