//! Scripted provider for unit tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::{Provider, ProviderEvent, ProviderRpcError};
use crate::types::Address;

/// Scripted answer to a request
pub enum Reply {
    Value(Value),
    Error(ProviderRpcError),
    /// Never answer
    Hang,
}

type Handler = Box<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

pub struct ScriptedProvider {
    handler: Handler,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<ProviderEvent>,
}

impl ScriptedProvider {
    pub fn new(handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            events,
        })
    }

    /// A cooperative wallet: grants `accounts`, sits on `chain`, accepts
    /// chain switches and answers everything else with `null`
    pub fn wallet(accounts: Vec<Address>, chain: u64) -> Arc<Self> {
        Self::new(move |method, _| match method {
            "eth_requestAccounts" | "eth_accounts" => Reply::Value(json!(accounts)),
            "eth_chainId" => Reply::Value(json!(format!("0x{:x}", chain))),
            _ => Reply::Value(Value::Null),
        })
    }

    pub fn calls(&self, method: &str) -> usize {
        self.lock_calls().iter().filter(|(m, _)| m == method).count()
    }

    pub fn methods(&self) -> Vec<String> {
        self.lock_calls().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.lock_calls()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<(String, Value)>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, ProviderRpcError> {
        let reply = (self.handler)(method, &params);
        self.lock_calls().push((method.to_string(), params));
        match reply {
            Reply::Value(v) => Ok(v),
            Reply::Error(e) => Err(e),
            Reply::Hang => futures::future::pending().await,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
