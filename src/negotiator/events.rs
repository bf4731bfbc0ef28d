//! Provider event handling for an established connection

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Phase, Shared};
use crate::activity::LogCategory;
use crate::notify::Notification;
use crate::provider::{ProviderEvent, ProviderHandle};
use crate::session::AttemptToken;

/// Follow the events of the connection committed by `token` until the
/// wallet disconnects or the connection is replaced
pub(super) fn spawn_watcher(
    shared: Arc<Shared>,
    token: AttemptToken,
    wallet_id: String,
    provider: ProviderHandle,
    mut events: broadcast::Receiver<ProviderEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} events from {}", skipped, wallet_id);
                    continue;
                }
                Err(RecvError::Closed) => {
                    debug!("Event stream of {} closed", wallet_id);
                    break;
                }
            };

            if !shared.apply_event(token, &wallet_id, &provider, event).await {
                break;
            }
        }
    })
}

impl Shared {
    /// Returns false once the connection is gone
    async fn apply_event(
        &self,
        token: AttemptToken,
        wallet_id: &str,
        provider: &ProviderHandle,
        event: ProviderEvent,
    ) -> bool {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                None => {
                    self.reset_owned(token, wallet_id, "wallet revoked access").await;
                    false
                }
                Some(account) => {
                    if !self.session.replace_account(token, account) {
                        return false;
                    }
                    self.activity.success(
                        LogCategory::Auth,
                        format!("Switched to account {}", account.short()),
                        None,
                    );
                    if let Some(listener) = &self.listener {
                        listener.on_connected(account, provider.clone()).await;
                    }
                    true
                }
            },
            ProviderEvent::ChainChanged(chain) => {
                if chain == self.target.chain_id {
                    info!("{} is back on {}", wallet_id, self.target.name);
                } else {
                    self.activity.error(
                        LogCategory::System,
                        format!("{} switched to unsupported chain {}", wallet_id, chain),
                        None,
                    );
                    self.notifier.notify(Notification::error(format!(
                        "Switch your wallet back to {}",
                        self.target.name
                    )));
                }
                true
            }
            ProviderEvent::Connect(chain) => {
                debug!("{} reports connection to chain {}", wallet_id, chain);
                true
            }
            ProviderEvent::Disconnect(error) => {
                self.reset_owned(token, wallet_id, &error.message).await;
                false
            }
        }
    }

    /// Same path as an explicit disconnect, limited to our own connection
    async fn reset_owned(&self, token: AttemptToken, wallet_id: &str, reason: &str) {
        if !self.session.clear_if_owned(token) {
            debug!("Ignoring disconnect of replaced connection to {}", wallet_id);
            return;
        }

        self.forget_wallet();
        // A newer attempt owns the phase while it runs
        if self.session.is_current(token) {
            self.phase.send_replace(Phase::Idle);
        }
        self.activity.success(
            LogCategory::Auth,
            format!("Disconnected {}: {}", wallet_id, reason),
            None,
        );
        if let Some(listener) = &self.listener {
            listener.on_disconnected().await;
        }
    }
}
