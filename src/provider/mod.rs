//! Wallet provider contract (EIP-1193)
//!
//! Every chain interaction funnels through [`Provider::request`]. Wallet
//! notifications (`accountsChanged`, `chainChanged`, `connect`,
//! `disconnect`) are delivered over a broadcast channel obtained from
//! [`Provider::subscribe`].
//!
//! [`ProviderExt`] layers typed helpers for the handful of JSON-RPC methods
//! the negotiator and facades rely on.

pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::types::{Address, ChainId, TxHash};

pub use http::HttpProvider;

/// EIP-1193 / JSON-RPC error codes
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const RESOURCE_UNAVAILABLE: i64 = -32002;
    pub const LIMIT_EXCEEDED: i64 = -32005;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Error object returned by a provider request
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("provider error {code}: {message}")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Code of the underlying wallet error. Mobile wallets wrap the real
    /// code in `data.originalError.code` under a generic internal error.
    pub fn effective_code(&self) -> i64 {
        self.data
            .as_ref()
            .and_then(|d| d.get("originalError"))
            .and_then(|o| o.get("code"))
            .and_then(Value::as_i64)
            .unwrap_or(self.code)
    }
}

/// Notification emitted by a wallet provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Connect(ChainId),
    Disconnect(ProviderRpcError),
}

/// Request/event interface of a wallet
#[async_trait]
pub trait Provider: Send + Sync {
    /// Issue a JSON-RPC request through the wallet
    async fn request(&self, method: &str, params: Value)
        -> std::result::Result<Value, ProviderRpcError>;

    /// Subscribe to wallet notifications
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Shared capability reference to a wallet provider
pub type ProviderHandle = Arc<dyn Provider>;

/// Identity of the object behind a handle, used to detect the same injected
/// provider reached through different injection points
pub fn handle_id(handle: &ProviderHandle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// Parameters for `wallet_addEthereumChain`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_explorer_urls: Vec<String>,
}

/// Native currency metadata for a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Transaction submitted through `eth_sendTransaction`
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Subset of a transaction receipt the facades care about
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
}

impl TransactionReceipt {
    /// Only an explicit `0x1` status counts as success
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1") | Some("0x01"))
    }
}

/// Typed helpers over [`Provider::request`]
#[async_trait]
pub trait ProviderExt: Provider {
    /// Request and deserialize the result
    async fn call_method<T: DeserializeOwned + Send>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(format!("{}: {}", method, e)))
    }

    /// Interactive account request (may prompt the user)
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.call_method("eth_requestAccounts", json!([])).await
    }

    /// Already-granted accounts; never prompts
    async fn accounts(&self) -> Result<Vec<Address>> {
        self.call_method("eth_accounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<ChainId> {
        let raw: String = self.call_method("eth_chainId", json!([])).await?;
        ChainId::from_hex(&raw)
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<()> {
        self.request(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain_id.to_hex() }]),
        )
        .await?;
        Ok(())
    }

    async fn add_chain(&self, params: &AddChainParams) -> Result<()> {
        self.request("wallet_addEthereumChain", json!([params])).await?;
        Ok(())
    }

    /// Read-only contract call; returns the raw hex result
    async fn eth_call(&self, to: Address, data: String) -> Result<String> {
        self.call_method("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    async fn native_balance(&self, account: Address) -> Result<String> {
        self.call_method("eth_getBalance", json!([account, "latest"]))
            .await
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        self.call_method("eth_sendTransaction", json!([tx])).await
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TransactionReceipt>> {
        self.call_method("eth_getTransactionReceipt", json!([hash]))
            .await
    }
}

impl<P: Provider + ?Sized> ProviderExt for P {}
