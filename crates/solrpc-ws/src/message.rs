//! Classification of complete inbound messages.
//!
//! Only the envelope is inspected here. The notification payload stays a raw
//! [`Value`] until the target subscription's handler decodes it, so the
//! classifier needs no knowledge of per-channel result shapes.

use serde_json::{Map, Value};
use thiserror::Error;

use solrpc_core::JsonRpcError;

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Answer to a request this client sent, matched by correlation id.
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Server push for a confirmed subscription.
    Notification {
        method: Option<String>,
        subscription: u64,
        result: Value,
    },
    /// Nothing can be routed from this message.
    Anomaly(Anomaly),
}

/// Why a message was unroutable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Anomaly {
    #[error("message is not valid JSON")]
    InvalidJson,
    #[error("batch messages are not routed on the streaming connection")]
    Batch,
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("request id {0} is not an unsigned integer")]
    NonNumericId(String),
    #[error("subscription id {0} is not an unsigned integer")]
    NonNumericSubscription(String),
    #[error("response {0} carries neither result nor error")]
    MissingOutcome(u64),
    #[error("message matches no known envelope")]
    Unrecognised,
}

/// Classify one complete message.
pub fn classify(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound::Anomaly(Anomaly::InvalidJson);
    };
    match value {
        Value::Object(obj) => classify_object(obj),
        Value::Array(_) => Inbound::Anomaly(Anomaly::Batch),
        _ => Inbound::Anomaly(Anomaly::NotAnObject),
    }
}

fn classify_object(mut obj: Map<String, Value>) -> Inbound {
    // Notification: params.subscription + params.result
    let is_notification = obj
        .get("params")
        .and_then(Value::as_object)
        .is_some_and(|p| p.contains_key("subscription") && p.contains_key("result"));
    if is_notification {
        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(Value::Object(mut params)) = obj.remove("params") else {
            return Inbound::Anomaly(Anomaly::Unrecognised);
        };
        let subscription = match params.get("subscription") {
            Some(v) => match v.as_u64() {
                Some(id) => id,
                None => return Inbound::Anomaly(Anomaly::NonNumericSubscription(v.to_string())),
            },
            None => return Inbound::Anomaly(Anomaly::Unrecognised),
        };
        let result = params.remove("result").unwrap_or(Value::Null);
        return Inbound::Notification {
            method,
            subscription,
            result,
        };
    }

    // Correlation response: id without method
    if obj.contains_key("method") {
        return Inbound::Anomaly(Anomaly::Unrecognised);
    }
    let id = match obj.get("id") {
        None | Some(Value::Null) => return Inbound::Anomaly(Anomaly::Unrecognised),
        Some(v) => match v.as_u64() {
            Some(id) => id,
            None => return Inbound::Anomaly(Anomaly::NonNumericId(v.to_string())),
        },
    };

    if let Some(raw) = obj.remove("error") {
        return Inbound::Response {
            id,
            outcome: Err(parse_error(raw)),
        };
    }
    match obj.remove("result") {
        Some(result) => Inbound::Response {
            id,
            outcome: Ok(result),
        },
        None => Inbound::Anomaly(Anomaly::MissingOutcome(id)),
    }
}

/// Decode an error object, keeping the raw value when it is malformed.
fn parse_error(raw: Value) -> JsonRpcError {
    match serde_json::from_value::<JsonRpcError>(raw.clone()) {
        Ok(err) => err,
        Err(_) => JsonRpcError {
            code: -32603,
            message: "malformed error object".into(),
            data: Some(raw),
        },
    }
}
