//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where notification callbacks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CallbackMode {
    /// On the receive loop. A slow callback delays delivery to every other
    /// subscription on the connection.
    #[default]
    Inline,
    /// On a fixed pool of workers, each with a bounded queue. A subscription
    /// is always served by the same worker, so its notifications stay in order.
    WorkerPool { workers: usize, queue_capacity: usize },
}

/// Configuration for [`WsStreamClient`](crate::WsStreamClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsClientConfig {
    /// Largest reassembled message accepted; bigger ones are discarded.
    pub max_message_bytes: usize,
    /// Callback execution strategy.
    pub callbacks: CallbackMode,
    /// How long `close` waits for the receive loop to stop.
    pub close_timeout_ms: u64,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 16 * 1024 * 1024,
            callbacks: CallbackMode::Inline,
            close_timeout_ms: 5_000,
        }
    }
}

impl WsClientConfig {
    /// Parse a JSON config document. Missing fields keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Run callbacks on `workers` workers with `queue_capacity` slots each.
    pub fn with_worker_pool(mut self, workers: usize, queue_capacity: usize) -> Self {
        self.callbacks = CallbackMode::WorkerPool {
            workers,
            queue_capacity,
        };
        self
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_fields_missing() {
        let cfg = WsClientConfig::from_json_str(r#"{"close_timeout_ms": 250}"#).unwrap();
        assert_eq!(cfg.close_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.callbacks, CallbackMode::Inline);
        assert_eq!(cfg.max_message_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn worker_pool_from_json() {
        let cfg = WsClientConfig::from_json_str(
            r#"{"callbacks": {"mode": "worker_pool", "workers": 4, "queue_capacity": 64}}"#,
        )
        .unwrap();
        assert_eq!(
            cfg.callbacks,
            CallbackMode::WorkerPool {
                workers: 4,
                queue_capacity: 64
            }
        );
    }

    #[test]
    fn builder_sets_pool() {
        let cfg = WsClientConfig::default().with_worker_pool(2, 8);
        assert!(matches!(cfg.callbacks, CallbackMode::WorkerPool { workers: 2, .. }));
    }
}
