//! Typed helpers for the ledger's notification channels.
//!
//! Each helper builds the channel's parameters and fixes the payload type
//! the callback receives; they are thin wrappers over
//! [`WsStreamClient::subscribe`].

use serde_json::Value;

use crate::client::WsStreamClient;
use crate::error::ClientError;
use crate::subscription::Subscription;
use crate::types::{
    AccountInfo, KeyedAccount, LogsFilter, LogsNotification, RpcResponse, SignatureResult,
    SlotInfo, SubscribeConfig,
};

fn with_config(mut params: Vec<Value>, config: &SubscribeConfig) -> Result<Vec<Value>, ClientError> {
    if !config.is_empty() {
        params.push(serde_json::to_value(config)?);
    }
    Ok(params)
}

impl WsStreamClient {
    /// `accountSubscribe`: changes to the lamports or data of `pubkey`.
    pub async fn account_subscribe<F>(
        &self,
        pubkey: &str,
        config: SubscribeConfig,
        callback: F,
    ) -> Result<Subscription, ClientError>
    where
        F: Fn(&Subscription, RpcResponse<AccountInfo>) + Send + Sync + 'static,
    {
        let params = with_config(vec![Value::from(pubkey)], &config)?;
        self.subscribe("account", params, callback).await
    }

    /// `programSubscribe`: changes to any account owned by `program_id`.
    pub async fn program_subscribe<F>(
        &self,
        program_id: &str,
        config: SubscribeConfig,
        callback: F,
    ) -> Result<Subscription, ClientError>
    where
        F: Fn(&Subscription, RpcResponse<KeyedAccount>) + Send + Sync + 'static,
    {
        let params = with_config(vec![Value::from(program_id)], &config)?;
        self.subscribe("program", params, callback).await
    }

    /// `signatureSubscribe`: status of one transaction signature.
    pub async fn signature_subscribe<F>(
        &self,
        signature: &str,
        config: SubscribeConfig,
        callback: F,
    ) -> Result<Subscription, ClientError>
    where
        F: Fn(&Subscription, RpcResponse<SignatureResult>) + Send + Sync + 'static,
    {
        let params = with_config(vec![Value::from(signature)], &config)?;
        self.subscribe("signature", params, callback).await
    }

    /// `logsSubscribe`: transaction logs matching `filter`.
    pub async fn logs_subscribe<F>(
        &self,
        filter: LogsFilter,
        config: SubscribeConfig,
        callback: F,
    ) -> Result<Subscription, ClientError>
    where
        F: Fn(&Subscription, RpcResponse<LogsNotification>) + Send + Sync + 'static,
    {
        let params = with_config(vec![filter.to_param()], &config)?;
        self.subscribe("logs", params, callback).await
    }

    /// `slotSubscribe`: every slot processed by the node.
    pub async fn slot_subscribe<F>(&self, callback: F) -> Result<Subscription, ClientError>
    where
        F: Fn(&Subscription, SlotInfo) + Send + Sync + 'static,
    {
        self.subscribe("slot", Vec::new(), callback).await
    }

    /// `rootSubscribe`: every new root slot.
    pub async fn root_subscribe<F>(&self, callback: F) -> Result<Subscription, ClientError>
    where
        F: Fn(&Subscription, u64) + Send + Sync + 'static,
    {
        self.subscribe("root", Vec::new(), callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Commitment;
    use serde_json::json;

    #[test]
    fn empty_config_is_omitted() {
        let params = with_config(vec![json!("abc")], &SubscribeConfig::default()).unwrap();
        assert_eq!(params, vec![json!("abc")]);
    }

    #[test]
    fn config_appended_last() {
        let params = with_config(
            vec![json!("abc")],
            &SubscribeConfig::with_commitment(Commitment::Confirmed),
        )
        .unwrap();
        assert_eq!(params, vec![json!("abc"), json!({"commitment": "confirmed"})]);
    }
}
