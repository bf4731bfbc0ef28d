//! JSON-RPC over HTTP provider
//!
//! Talks to a node endpoint directly. Useful for headless use of the
//! negotiator and facades (node-managed accounts, dev chains). There is no
//! user to prompt, so `eth_requestAccounts` is answered from
//! `eth_accounts`, and wallet-only methods report "unsupported method".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{codes, Provider, ProviderEvent, ProviderRpcError};

/// Methods only a user-facing wallet can serve
const WALLET_ONLY_METHODS: &[&str] = &["wallet_switchEthereumChain", "wallet_addEthereumChain"];

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProviderRpcError>,
}

/// Provider backed by a JSON-RPC HTTP endpoint
pub struct HttpProvider {
    client: Client,
    url: String,
    next_id: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpProvider {
    /// Create a provider for `url` with a per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderRpcError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ProviderRpcError::new(codes::INTERNAL_ERROR, format!("HTTP client: {}", e))
        })?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Translate a decoded JSON-RPC envelope into a request outcome
fn into_result(response: JsonRpcResponse) -> Result<Value, ProviderRpcError> {
    match (response.error, response.result) {
        (Some(error), _) => Err(error),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        if WALLET_ONLY_METHODS.contains(&method) {
            return Err(ProviderRpcError::new(
                codes::UNSUPPORTED_METHOD,
                format!("{} is not available on a node endpoint", method),
            ));
        }

        let method = match method {
            "eth_requestAccounts" => "eth_accounts",
            other => other,
        };

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!("JSON-RPC {} -> {}", method, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderRpcError::new(codes::INTERNAL_ERROR, format!("transport: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderRpcError::new(
                codes::INTERNAL_ERROR,
                format!("HTTP {}", response.status()),
            ));
        }

        let envelope: JsonRpcResponse = response.json().await.map_err(|e| {
            ProviderRpcError::new(codes::INTERNAL_ERROR, format!("invalid response: {}", e))
        })?;

        into_result(envelope)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
