//! Notification payload types for the ledger's subscription channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Slot context attached to most notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcContext {
    pub slot: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// `{ "context": ..., "value": ... }` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub context: RpcContext,
    pub value: T,
}

/// Account state as pushed by `accountNotification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: String,
    /// `[data, encoding]` for binary encodings, an object for `jsonParsed`.
    pub data: Value,
    pub executable: bool,
    pub rent_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<u64>,
}

/// Account plus its address, as pushed by `programNotification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedAccount {
    pub pubkey: String,
    pub account: AccountInfo,
}

/// Value of a `signatureNotification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignatureResult {
    /// The transaction reached the requested commitment; `err` is `None` on success.
    Processed { err: Option<Value> },
    /// `"receivedSignature"`, sent when received notifications are enabled.
    Received(String),
}

impl SignatureResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Processed { err: None })
    }
}

/// Value of a `logsNotification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsNotification {
    pub signature: String,
    pub err: Option<Value>,
    pub logs: Vec<String>,
}

/// Payload of a `slotNotification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub parent: u64,
    pub root: u64,
    pub slot: u64,
}

/// Commitment level requested for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl std::str::FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown commitment level: {other}")),
        }
    }
}

/// Account data encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "base58")]
    Base58,
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "base64+zstd")]
    Base64Zstd,
    #[serde(rename = "jsonParsed")]
    JsonParsed,
}

/// Optional configuration object sent as the last subscribe parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<Commitment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_received_notification: Option<bool>,
}

impl SubscribeConfig {
    pub fn with_commitment(commitment: Commitment) -> Self {
        Self {
            commitment: Some(commitment),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Which transactions a logs subscription reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogsFilter {
    /// All transactions except simple vote transactions.
    All,
    /// All transactions including votes.
    AllWithVotes,
    /// Transactions mentioning the given address.
    Mentions(Vec<String>),
}

impl LogsFilter {
    /// The filter as a request parameter.
    pub fn to_param(&self) -> Value {
        match self {
            Self::All => Value::from("all"),
            Self::AllWithVotes => Value::from("allWithVotes"),
            Self::Mentions(keys) => serde_json::json!({ "mentions": keys }),
        }
    }
}
