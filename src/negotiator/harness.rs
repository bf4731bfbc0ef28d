//! Test fixtures for the negotiator

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use super::chain::test_chain;
use super::{
    ConnectionListener, ConnectionNegotiator, NegotiatorBuilder, NegotiatorConfig, RelayApproval,
    RelayConnector, RelayPairing,
};
use crate::activity::ActivityLog;
use crate::error::Result;
use crate::notify::{ChannelNotifier, Notification};
use crate::provider::scripted::ScriptedProvider;
use crate::provider::{Provider, ProviderEvent, ProviderHandle, ProviderRpcError};
use crate::registry::{
    Availability, Capabilities, DeepLink, DeepLinkLauncher, Environment, Evidence,
    InjectedProvider, ProviderAnnouncement, StaticEnvironment, WalletDescriptor,
};
use crate::session::{MemorySessionStore, Session};
use crate::types::Address;

pub const DESKTOP_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Chrome/126.0 Safari/537.36";
pub const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148";
pub const DAPP_URL: &str = "https://app.velacore.io";

pub fn account_abcd() -> Address {
    "0xabcd000000000000000000000000000000001234".parse().unwrap()
}

pub fn account(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = n;
    Address::from_bytes(bytes)
}

/// Descriptor of an injected wallet, as the registry would produce it
pub fn injected(id: &str, provider: ProviderHandle) -> WalletDescriptor {
    WalletDescriptor {
        id: id.to_string(),
        display_name: format!("Wallet {}", id),
        capabilities: Capabilities::default(),
        availability: Availability::Injected(provider),
        evidence: Some(Evidence::BrandFlag),
    }
}

pub struct Harness {
    pub negotiator: ConnectionNegotiator,
    pub session: Arc<Session>,
    pub store: Arc<MemorySessionStore>,
    pub activity: Arc<ActivityLog>,
    toasts: mpsc::UnboundedReceiver<Notification>,
    launched: Arc<Mutex<Vec<DeepLink>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(MemorySessionStore::new(), |b| b)
    }

    pub fn build(
        store: MemorySessionStore,
        customize: impl FnOnce(NegotiatorBuilder) -> NegotiatorBuilder,
    ) -> Self {
        let session = Arc::new(Session::new());
        let store = Arc::new(store);
        let activity = Arc::new(ActivityLog::default());
        let (notifier, toasts) = ChannelNotifier::new();
        let launched = Arc::new(Mutex::new(Vec::new()));

        let builder = ConnectionNegotiator::builder(
            NegotiatorConfig::new(test_chain()),
            session.clone(),
            store.clone(),
            activity.clone(),
        )
        .notifier(Arc::new(notifier))
        .launcher(Arc::new(RecordingLauncher(launched.clone())));

        Self {
            negotiator: customize(builder).build(),
            session,
            store,
            activity,
            toasts,
            launched,
        }
    }

    pub fn drain_toasts(&mut self) -> Vec<Notification> {
        let mut toasts = Vec::new();
        while let Ok(toast) = self.toasts.try_recv() {
            toasts.push(toast);
        }
        toasts
    }

    pub fn launched(&self) -> Vec<DeepLink> {
        self.launched.lock().unwrap().clone()
    }
}

struct RecordingLauncher(Arc<Mutex<Vec<DeepLink>>>);

impl DeepLinkLauncher for RecordingLauncher {
    fn launch(&self, link: &DeepLink) -> Result<()> {
        self.0.lock().unwrap().push(link.clone());
        Ok(())
    }
}

/// Sends `Some(account)` per connection or account switch, `None` per disconnect
pub struct RecordingListener(mpsc::UnboundedSender<Option<Address>>);

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Option<Address>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

#[async_trait]
impl ConnectionListener for RecordingListener {
    async fn on_connected(&self, account: Address, _provider: ProviderHandle) {
        let _ = self.0.send(Some(account));
    }

    async fn on_disconnected(&self) {
        let _ = self.0.send(None);
    }
}

/// Wallet that takes `delay` to answer the account request
pub struct SlowWallet {
    inner: Arc<ScriptedProvider>,
    delay: Duration,
}

impl SlowWallet {
    pub fn new(inner: Arc<ScriptedProvider>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { inner, delay })
    }
}

#[async_trait]
impl Provider for SlowWallet {
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, ProviderRpcError> {
        if method == "eth_requestAccounts" {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.request(method, params).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.subscribe()
    }
}

/// Relay whose user approves immediately
pub struct FakeRelay {
    accounts: Vec<Address>,
}

impl FakeRelay {
    pub fn approving(accounts: Vec<Address>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl RelayConnector for FakeRelay {
    async fn create_session(&self) -> Result<RelayPairing> {
        Ok(RelayPairing {
            topic: "velacore-test".to_string(),
            uri: "wc:velacore-test@2?relay-protocol=irn".to_string(),
        })
    }

    async fn await_approval(&self, _pairing: &RelayPairing) -> Result<RelayApproval> {
        Ok(RelayApproval {
            accounts: self.accounts.clone(),
            provider: ScriptedProvider::wallet(self.accounts.clone(), 97),
        })
    }
}

/// Environment counting how often it is scanned
pub struct CountingEnv {
    pub inner: StaticEnvironment,
    scans: AtomicUsize,
}

impl CountingEnv {
    pub fn new(user_agent: &str) -> Self {
        Self {
            inner: StaticEnvironment::new(user_agent, DAPP_URL),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl Environment for CountingEnv {
    fn injected(&self) -> Vec<InjectedProvider> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.injected()
    }

    fn user_agent(&self) -> String {
        self.inner.user_agent()
    }

    fn dapp_url(&self) -> String {
        self.inner.dapp_url()
    }

    fn announcements(&self) -> broadcast::Receiver<ProviderAnnouncement> {
        self.inner.announcements()
    }

    fn request_providers(&self) {
        self.inner.request_providers()
    }
}
