//! JSON-RPC 2.0 wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request. Ids are always numeric on the streaming
/// connection, so replies can be matched without string handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_request_shape() {
        let req = JsonRpcRequest::new(2, "accountUnsubscribe", vec![Value::from(23784u64)]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "accountUnsubscribe",
                "params": [23784]
            })
        );
    }

    #[test]
    fn error_object_without_data() {
        let err: JsonRpcError =
            serde_json::from_str(r#"{"code":-32602,"message":"Invalid param: WrongSize"}"#).unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.data, None);
        assert_eq!(err.to_string(), "JSON-RPC error -32602: Invalid param: WrongSize");
    }
}
