//! Connection negotiator
//!
//! Turns a wallet choice into a validated [`ConnectionState`]:
//!
//! ```text
//! Idle -> RequestingAccounts -> ChainCheck -> [ChainSwitch] -> Connected
//! Idle -> AwaitingExternalApproval -> RequestingAccounts -> ...   (mobile, relay)
//! any step -> Failed
//! ```
//!
//! Every attempt takes an [`AttemptToken`]. Results of a superseded attempt
//! are dropped: they never touch the session and never notify the user.

mod chain;
mod events;
#[cfg(test)]
mod harness;
mod mobile;
mod relay;

pub use chain::{ensure_chain, ChainSpec};
pub use relay::{RelayApproval, RelayConnector, RelayPairing};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity::{ActivityLog, LogCategory};
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::provider::{ProviderExt, ProviderHandle};
use crate::registry::{Availability, DeepLinkLauncher, LoggingLauncher, WalletDescriptor};
use crate::session::{ActiveConnection, AttemptToken, ConnectionState, Session, SessionStore};
use crate::types::Address;

/// Where the current attempt stands
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    RequestingAccounts,
    ChainCheck,
    ChainSwitch,
    AwaitingExternalApproval,
    Connected,
    Failed(Error),
}

/// Receives every established connection, and account switches on it
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn on_connected(&self, account: Address, provider: ProviderHandle);

    async fn on_disconnected(&self) {}
}

/// Negotiation timing and the target chain
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub target: ChainSpec,
    /// Budget for the interactive account request
    pub request_timeout: Duration,
    pub mobile_poll_interval: Duration,
    /// Budget for a launched mobile wallet to inject its provider
    pub mobile_timeout: Duration,
    pub relay_timeout: Duration,
}

impl NegotiatorConfig {
    pub fn new(target: ChainSpec) -> Self {
        Self {
            target,
            request_timeout: Duration::from_secs(60),
            mobile_poll_interval: Duration::from_secs(1),
            mobile_timeout: Duration::from_secs(30),
            relay_timeout: Duration::from_secs(120),
        }
    }
}

/// State shared with the provider event watcher
struct Shared {
    session: Arc<Session>,
    store: Arc<dyn SessionStore>,
    activity: Arc<ActivityLog>,
    notifier: Arc<dyn Notifier>,
    listener: Option<Arc<dyn ConnectionListener>>,
    phase: watch::Sender<Phase>,
    target: ChainSpec,
}

impl Shared {
    /// Publish a phase on behalf of `token`; ignored once superseded
    fn set_phase(&self, token: AttemptToken, phase: Phase) {
        if self.session.is_current(token) {
            debug!("Negotiation phase: {:?}", phase);
            self.phase.send_replace(phase);
        }
    }

    fn forget_wallet(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear session hint: {}", e);
        }
    }
}

pub struct NegotiatorBuilder {
    config: NegotiatorConfig,
    session: Arc<Session>,
    store: Arc<dyn SessionStore>,
    activity: Arc<ActivityLog>,
    notifier: Arc<dyn Notifier>,
    listener: Option<Arc<dyn ConnectionListener>>,
    launcher: Arc<dyn DeepLinkLauncher>,
    relay: Option<Arc<dyn RelayConnector>>,
}

impl NegotiatorBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn DeepLinkLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn relay(mut self, relay: Arc<dyn RelayConnector>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn build(self) -> ConnectionNegotiator {
        let (phase, _) = watch::channel(Phase::Idle);
        ConnectionNegotiator {
            shared: Arc::new(Shared {
                session: self.session,
                store: self.store,
                activity: self.activity,
                notifier: self.notifier,
                listener: self.listener,
                phase,
                target: self.config.target.clone(),
            }),
            config: self.config,
            launcher: self.launcher,
            relay: self.relay,
            watcher: Mutex::new(None),
        }
    }
}

pub struct ConnectionNegotiator {
    config: NegotiatorConfig,
    shared: Arc<Shared>,
    launcher: Arc<dyn DeepLinkLauncher>,
    relay: Option<Arc<dyn RelayConnector>>,
    /// Provider event watcher of the current connection
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionNegotiator {
    pub fn builder(
        config: NegotiatorConfig,
        session: Arc<Session>,
        store: Arc<dyn SessionStore>,
        activity: Arc<ActivityLog>,
    ) -> NegotiatorBuilder {
        NegotiatorBuilder {
            config,
            session,
            store,
            activity,
            notifier: Arc::new(TracingNotifier),
            listener: None,
            launcher: Arc::new(LoggingLauncher),
            relay: None,
        }
    }

    pub fn config(&self) -> &NegotiatorConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.shared.session
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.shared.phase.subscribe()
    }

    /// Connect to an injected or relay wallet
    ///
    /// Failures are logged and surfaced as a notification before being
    /// returned. Deep-link wallets go through
    /// [`connect_mobile`](Self::connect_mobile).
    pub async fn connect(&self, descriptor: &WalletDescriptor) -> Result<ConnectionState> {
        let token = self.shared.session.begin_attempt();
        info!("Connecting to {} (attempt {:?})", descriptor.display_name, token);

        let result = match &descriptor.availability {
            Availability::Injected(provider) => {
                self.negotiate(token, descriptor, provider.clone()).await
            }
            Availability::Relay => self.negotiate_relay(token, descriptor).await,
            Availability::DeepLink(_) => Err(Error::ProviderNotFound(format!(
                "{} is not injected; open it through its mobile app",
                descriptor.display_name
            ))),
        };

        self.settle(token, descriptor, result)
    }

    /// Reconnect to the wallet named by the session hint without prompting
    ///
    /// Best effort: every failure is logged at debug level and yields
    /// `None`; the user is never notified. A wallet that no longer grants
    /// any account has its hint cleared.
    pub async fn reconnect_silently(&self, descriptors: &[WalletDescriptor]) -> Option<ConnectionState> {
        let hint = match self.shared.store.load() {
            Ok(Some(hint)) => hint,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read session hint: {}", e);
                return None;
            }
        };

        let Some(descriptor) = descriptors.iter().find(|d| d.id == hint) else {
            debug!("Last wallet {} not available, skipping reconnect", hint);
            return None;
        };
        let Some(provider) = descriptor.provider() else {
            debug!("Last wallet {} is not injected, skipping reconnect", hint);
            return None;
        };

        let token = self.shared.session.begin_attempt();
        let accounts = match tokio::time::timeout(self.config.request_timeout, provider.accounts()).await {
            Ok(Ok(accounts)) => accounts,
            Ok(Err(e)) => {
                debug!("Silent reconnect to {} failed: {}", hint, e);
                return None;
            }
            Err(_) => {
                debug!("Silent reconnect to {} timed out", hint);
                return None;
            }
        };

        let Some(account) = accounts.first().copied() else {
            info!("{} no longer grants any account, clearing session hint", descriptor.display_name);
            self.shared.forget_wallet();
            return None;
        };

        // Transactions re-check the chain, so a mismatch is only reported here
        match provider.chain_id().await {
            Ok(chain) if chain != self.config.target.chain_id => warn!(
                "{} is on chain {}, expected {}",
                descriptor.display_name, chain, self.config.target.chain_id
            ),
            Ok(_) => {}
            Err(e) => debug!("Could not read chain of {}: {}", descriptor.display_name, e),
        }

        match self.establish(token, descriptor, account, provider, true).await {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("Silent reconnect to {} discarded: {}", hint, e);
                None
            }
        }
    }

    /// Drop the current connection and the session hint
    pub async fn disconnect(&self) {
        self.stop_watcher();

        let previous = self
            .shared
            .session
            .snapshot()
            .connected_wallet_id()
            .map(str::to_string);
        self.shared.session.clear();
        self.shared.forget_wallet();
        self.shared.phase.send_replace(Phase::Idle);

        if let Some(wallet_id) = previous {
            self.shared
                .activity
                .success(LogCategory::Auth, format!("Disconnected {}", wallet_id), None);
            if let Some(listener) = &self.shared.listener {
                listener.on_disconnected().await;
            }
        }
    }

    async fn negotiate(
        &self,
        token: AttemptToken,
        descriptor: &WalletDescriptor,
        provider: ProviderHandle,
    ) -> Result<ConnectionState> {
        self.shared.set_phase(token, Phase::RequestingAccounts);
        let accounts = match tokio::time::timeout(self.config.request_timeout, provider.request_accounts()).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(self.config.request_timeout.as_millis() as u64)),
        };
        let account = accounts.first().copied().ok_or(Error::NoAccountsReturned)?;

        ensure_chain(provider.as_ref(), &self.config.target, |phase| {
            self.shared.set_phase(token, phase)
        })
        .await?;

        self.establish(token, descriptor, account, provider, false).await
    }

    async fn negotiate_relay(
        &self,
        token: AttemptToken,
        descriptor: &WalletDescriptor,
    ) -> Result<ConnectionState> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| Error::ProviderNotFound("no session relay configured".to_string()))?;

        self.shared.set_phase(token, Phase::AwaitingExternalApproval);
        let pairing = relay.create_session().await?;
        info!("Relay session {} created", pairing.topic);
        self.shared
            .notifier
            .notify(Notification::info(format!("Approve the connection in your wallet: {}", pairing.uri)));

        let approval = match tokio::time::timeout(self.config.relay_timeout, relay.await_approval(&pairing)).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(self.config.relay_timeout.as_millis() as u64)),
        };
        let account = approval.accounts.first().copied().ok_or(Error::NoAccountsReturned)?;

        ensure_chain(approval.provider.as_ref(), &self.config.target, |phase| {
            self.shared.set_phase(token, phase)
        })
        .await?;

        self.establish(token, descriptor, account, approval.provider, false)
            .await
    }

    /// Commit a validated connection and start watching its provider
    async fn establish(
        &self,
        token: AttemptToken,
        descriptor: &WalletDescriptor,
        account: Address,
        provider: ProviderHandle,
        silent: bool,
    ) -> Result<ConnectionState> {
        // Subscribe before committing so no event after the commit is missed
        let events = provider.subscribe();
        let state = self.shared.session.commit(
            token,
            ActiveConnection {
                account,
                provider: provider.clone(),
                wallet_id: descriptor.id.clone(),
            },
        )?;

        if let Err(e) = self.shared.store.save(&descriptor.id) {
            warn!("Failed to persist session hint: {}", e);
        }
        self.shared.set_phase(token, Phase::Connected);

        let verb = if silent { "Reconnected" } else { "Connected" };
        self.shared.activity.success(
            LogCategory::Auth,
            format!("{} {} via {}", verb, account.short(), descriptor.display_name),
            None,
        );
        if !silent {
            self.shared
                .notifier
                .notify(Notification::success(format!("Connected to {}", descriptor.display_name)));
        }

        let watcher = events::spawn_watcher(
            self.shared.clone(),
            token,
            descriptor.id.clone(),
            provider.clone(),
            events,
        );
        if let Some(previous) = self.lock_watcher().replace(watcher) {
            previous.abort();
        }

        if let Some(listener) = &self.shared.listener {
            listener.on_connected(account, provider).await;
        }

        Ok(state)
    }

    /// Report the outcome of an interactive attempt
    fn settle(
        &self,
        token: AttemptToken,
        descriptor: &WalletDescriptor,
        result: Result<ConnectionState>,
    ) -> Result<ConnectionState> {
        match result {
            Ok(state) => Ok(state),
            Err(e) if e == Error::Superseded || !self.shared.session.is_current(token) => {
                debug!("Dropping outcome of superseded attempt to {}: {}", descriptor.id, e);
                Err(Error::Superseded)
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", descriptor.display_name, e);
                self.shared.phase.send_replace(Phase::Failed(e.clone()));
                self.shared.activity.error(
                    LogCategory::Auth,
                    format!("Failed to connect {}: {}", descriptor.display_name, e),
                    None,
                );
                self.shared
                    .notifier
                    .notify(Notification::error(format!("{}: {}", descriptor.display_name, e)));
                Err(e)
            }
        }
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self.lock_watcher().take() {
            watcher.abort();
        }
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ConnectionNegotiator {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}
