//! Shared connection state with attempt tokens
//!
//! The account, provider and wallet id live together in one
//! [`ActiveConnection`], so they can only be set or cleared as a unit.
//!
//! Every connection attempt takes a monotonically increasing
//! [`AttemptToken`]. A commit carrying an outdated token is rejected, which
//! keeps a slow attempt from overwriting a fresher connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{handle_id, ProviderHandle};
use crate::types::Address;

/// Identifier of a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttemptToken(u64);

/// A validated wallet connection
#[derive(Clone)]
pub struct ActiveConnection {
    pub account: Address,
    pub provider: ProviderHandle,
    pub wallet_id: String,
}

impl std::fmt::Debug for ActiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnection")
            .field("account", &self.account)
            .field("provider", &format_args!("<{:#x}>", handle_id(&self.provider)))
            .field("wallet_id", &self.wallet_id)
            .finish()
    }
}

/// `{account, provider, connectedWalletId}`: all present or all absent
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    active: Option<ActiveConnection>,
}

impl ConnectionState {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn account(&self) -> Option<Address> {
        self.active.as_ref().map(|c| c.account)
    }

    pub fn provider(&self) -> Option<&ProviderHandle> {
        self.active.as_ref().map(|c| &c.provider)
    }

    pub fn connected_wallet_id(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.wallet_id.as_str())
    }

    pub fn active(&self) -> Option<&ActiveConnection> {
        self.active.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }
}

struct Inner {
    state: ConnectionState,
    /// Attempt that produced the current connection
    owner: Option<AttemptToken>,
}

/// Explicitly owned holder of the connection state
pub struct Session {
    inner: RwLock<Inner>,
    latest: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: ConnectionState::disconnected(),
                owner: None,
            }),
            latest: AtomicU64::new(0),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ConnectionState {
        self.read().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.read().state.is_connected()
    }

    /// Start a new attempt, superseding every earlier one
    pub fn begin_attempt(&self) -> AttemptToken {
        AttemptToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether `token` is still the newest attempt
    pub fn is_current(&self, token: AttemptToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }

    /// Install a connection produced by `token`, unless a newer attempt
    /// (or a disconnect) has started since
    pub fn commit(&self, token: AttemptToken, connection: ActiveConnection) -> Result<ConnectionState> {
        let mut inner = self.write();
        if !self.is_current(token) {
            debug!("Discarding result of superseded attempt {:?}", token);
            return Err(Error::Superseded);
        }

        inner.state = ConnectionState {
            active: Some(connection),
        };
        inner.owner = Some(token);
        Ok(inner.state.clone())
    }

    /// Disconnect unconditionally; in-flight attempts are superseded
    pub fn clear(&self) {
        let mut inner = self.write();
        self.latest.fetch_add(1, Ordering::SeqCst);
        inner.state = ConnectionState::disconnected();
        inner.owner = None;
    }

    /// Disconnect only if the current connection was produced by `token`
    ///
    /// Attempts started after `token` stay current and may still commit.
    pub fn clear_if_owned(&self, token: AttemptToken) -> bool {
        let mut inner = self.write();
        if inner.owner != Some(token) {
            return false;
        }
        inner.state = ConnectionState::disconnected();
        inner.owner = None;
        true
    }

    /// Replace the account of the connection owned by `token`
    pub fn replace_account(&self, token: AttemptToken, account: Address) -> bool {
        let mut inner = self.write();
        if inner.owner != Some(token) {
            return false;
        }
        match inner.state.active.as_mut() {
            Some(active) => {
                active.account = account;
                true
            }
            None => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
