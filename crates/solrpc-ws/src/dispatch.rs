//! Dispatch engine: routes notification payloads to the subscription's
//! stored handler.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::CallbackMode;
use crate::error::SubscriptionError;
use crate::registry::SubscriptionRegistry;
use crate::subscription::{Subscription, SubscriptionStatus};

/// Decodes a raw notification payload and delivers it.
///
/// Each subscription stores one of these, captured at subscribe time with
/// the subscription's result type, so one registry can serve subscriptions
/// of different payload shapes.
pub trait NotificationHandler: Send + Sync + 'static {
    fn handle_raw(&self, subscription: &Subscription, payload: Value) -> Result<(), serde_json::Error>;
}

/// Deserializes the payload into `T` and calls the callback with it.
pub struct TypedHandler<T, F> {
    callback: F,
    _result: PhantomData<fn(T)>,
}

impl<T, F> TypedHandler<T, F>
where
    T: DeserializeOwned + 'static,
    F: Fn(&Subscription, T) + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _result: PhantomData,
        }
    }
}

impl<T, F> NotificationHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + 'static,
    F: Fn(&Subscription, T) + Send + Sync + 'static,
{
    fn handle_raw(&self, subscription: &Subscription, payload: Value) -> Result<(), serde_json::Error> {
        let value: T = serde_json::from_value(payload)?;
        (self.callback)(subscription, value);
        Ok(())
    }
}

/// Result of dispatching one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// Callback ran.
    Delivered,
    /// Handed to a callback worker.
    Queued,
    /// No subscription is active for the id.
    Dropped,
    /// Payload failed to decode or the callback panicked.
    Failed,
}

struct Delivery {
    subscription: Subscription,
    payload: Value,
}

pub(crate) struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    workers: Vec<mpsc::Sender<Delivery>>,
}

impl Dispatcher {
    /// `WorkerPool` mode spawns its workers, so it needs a Tokio runtime.
    pub(crate) fn new(registry: Arc<SubscriptionRegistry>, mode: CallbackMode) -> Self {
        let workers = match mode {
            CallbackMode::Inline => Vec::new(),
            CallbackMode::WorkerPool {
                workers,
                queue_capacity,
            } => (0..workers.max(1))
                .map(|idx| spawn_worker(idx, queue_capacity.max(1)))
                .collect(),
        };
        Self { registry, workers }
    }

    pub(crate) async fn dispatch(&self, server_id: u64, payload: Value) -> DispatchOutcome {
        let Some(subscription) = self.registry.route(server_id) else {
            tracing::debug!(server_id, "notification for inactive subscription dropped");
            return DispatchOutcome::Dropped;
        };

        if self.workers.is_empty() {
            return deliver(&subscription, payload);
        }

        // Same subscription, same worker: keeps per-subscription order.
        let idx = (server_id % self.workers.len() as u64) as usize;
        match self.workers[idx]
            .send(Delivery {
                subscription,
                payload,
            })
            .await
        {
            Ok(()) => DispatchOutcome::Queued,
            Err(_) => {
                tracing::warn!(server_id, worker = idx, "callback worker gone, notification dropped");
                DispatchOutcome::Dropped
            }
        }
    }
}

fn spawn_worker(idx: usize, queue_capacity: usize) -> mpsc::Sender<Delivery> {
    let (tx, mut rx) = mpsc::channel::<Delivery>(queue_capacity);
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            // Unsubscribed while queued.
            if delivery.subscription.status() != SubscriptionStatus::Subscribed {
                continue;
            }
            deliver(&delivery.subscription, delivery.payload);
        }
        tracing::debug!(worker = idx, "callback worker stopped");
    });
    tx
}

/// Run the subscription's handler. Failures are reported on the
/// subscription and never terminate the caller.
fn deliver(subscription: &Subscription, payload: Value) -> DispatchOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| subscription.handle_raw(payload)));
    let error = match result {
        Ok(Ok(())) => return DispatchOutcome::Delivered,
        Ok(Err(e)) => {
            tracing::warn!(
                channel = subscription.channel(),
                server_id = ?subscription.server_id(),
                error = %e,
                "failed to decode notification"
            );
            SubscriptionError::Decode(e.to_string())
        }
        Err(_) => {
            tracing::warn!(
                channel = subscription.channel(),
                server_id = ?subscription.server_id(),
                "notification callback panicked"
            );
            SubscriptionError::CallbackPanicked
        }
    };
    if subscription.fault(error).is_some() {
        subscription.flush_events();
    }
    DispatchOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Weak;

    #[derive(Debug, Deserialize)]
    struct Slot {
        slot: u64,
    }

    fn active_sub<F>(registry: &SubscriptionRegistry, server_id: u64, callback: F) -> Subscription
    where
        F: Fn(&Subscription, Slot) + Send + Sync + 'static,
    {
        let sub = Subscription::new(
            registry.next_correlation_id(),
            "slot",
            vec![],
            Box::new(TypedHandler::new(callback)),
            Weak::new(),
        );
        registry.register_subscribe(&sub).unwrap();
        registry.complete(sub.correlation_id(), Ok(json!(server_id)));
        sub
    }

    #[tokio::test]
    async fn delivers_decoded_value_to_matching_subscription() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        active_sub(&registry, 1, move |_, s| {
            let _ = tx_a.send(s.slot);
        });
        active_sub(&registry, 2, move |_, s| {
            let _ = tx_b.send(s.slot);
        });

        let dispatcher = Dispatcher::new(Arc::clone(&registry), CallbackMode::Inline);
        assert_eq!(
            dispatcher.dispatch(2, json!({"slot": 77})).await,
            DispatchOutcome::Delivered
        );
        assert_eq!(rx_b.try_recv().unwrap(), 77);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_id_dropped() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Dispatcher::new(registry, CallbackMode::Inline);
        assert_eq!(
            dispatcher.dispatch(404, json!({"slot": 1})).await,
            DispatchOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn decode_failure_is_reported_and_non_fatal() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = active_sub(&registry, 9, move |_, s| {
            let _ = tx.send(s.slot);
        });
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        sub.on_status_changed(move |_, event| {
            let _ = err_tx.send(event.clone());
        });

        let dispatcher = Dispatcher::new(Arc::clone(&registry), CallbackMode::Inline);
        assert_eq!(
            dispatcher.dispatch(9, json!({"slot": "nope"})).await,
            DispatchOutcome::Failed
        );
        let event = err_rx.try_recv().unwrap();
        assert_eq!(event.status, SubscriptionStatus::Subscribed);
        assert!(matches!(event.error, Some(SubscriptionError::Decode(_))));

        dispatcher.dispatch(9, json!({"slot": 10})).await;
        assert_eq!(rx.try_recv().unwrap(), 10);
        assert_eq!(sub.status(), SubscriptionStatus::Subscribed);
    }

    #[tokio::test]
    async fn panicking_callback_is_contained() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let sub = active_sub(&registry, 3, |_, _| panic!("callback bug"));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), CallbackMode::Inline);

        assert_eq!(
            dispatcher.dispatch(3, json!({"slot": 1})).await,
            DispatchOutcome::Failed
        );
        assert_eq!(sub.last_error(), Some(SubscriptionError::CallbackPanicked));
        assert_eq!(sub.status(), SubscriptionStatus::Subscribed);
    }

    #[tokio::test]
    async fn worker_pool_preserves_order() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        active_sub(&registry, 5, move |_, s| {
            let _ = tx.send(s.slot);
        });
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            CallbackMode::WorkerPool {
                workers: 3,
                queue_capacity: 2,
            },
        );

        for slot in 1..=20u64 {
            assert_eq!(
                dispatcher.dispatch(5, json!({ "slot": slot })).await,
                DispatchOutcome::Queued
            );
        }
        let mut seen = Vec::new();
        while seen.len() < 20 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
    }
}
