//! Mobile deep-link connection
//!
//! After launching the wallet app there is no request to wait on. The
//! registry is polled at a fixed interval until the launched wallet's
//! provider shows up, then the regular account request runs. Polling has
//! its own deadline and can be cancelled by the user.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ConnectionNegotiator, Phase};
use crate::error::{Error, Result};
use crate::provider::ProviderHandle;
use crate::registry::{Environment, WalletDescriptor, WalletRegistry};
use crate::retry::{self, AttemptError, BoundedRetry, RetryError};
use crate::session::{AttemptToken, ConnectionState};

impl ConnectionNegotiator {
    /// Launch a wallet app and connect once it injects its provider
    ///
    /// Returns `Ok(None)` when `cancel` fires first; the negotiator is back
    /// in [`Phase::Idle`] and nothing is reported. An injected descriptor
    /// (wallet in-app browser) connects directly.
    pub async fn connect_mobile(
        &self,
        descriptor: &WalletDescriptor,
        env: &dyn Environment,
        cancel: CancellationToken,
    ) -> Result<Option<ConnectionState>> {
        if descriptor.is_detected() {
            return self.connect(descriptor).await.map(Some);
        }

        let token = self.shared.session.begin_attempt();
        let result = match self.await_injection(token, descriptor, env, cancel).await {
            Ok(Some(provider)) => self.negotiate(token, descriptor, provider).await,
            Ok(None) => {
                info!("Connection to {} cancelled", descriptor.display_name);
                self.shared.set_phase(token, Phase::Idle);
                return Ok(None);
            }
            Err(e) => Err(e),
        };

        self.settle(token, descriptor, result).map(Some)
    }

    async fn await_injection(
        &self,
        token: AttemptToken,
        descriptor: &WalletDescriptor,
        env: &dyn Environment,
        cancel: CancellationToken,
    ) -> Result<Option<ProviderHandle>> {
        let link = descriptor.deep_link().ok_or_else(|| {
            Error::ProviderNotFound(format!("{} has no mobile deep link", descriptor.display_name))
        })?;

        self.shared.set_phase(token, Phase::AwaitingExternalApproval);
        self.launcher.launch(link)?;
        info!(
            "Waiting up to {:?} for {} to connect",
            self.config.mobile_timeout, descriptor.display_name
        );

        let shared = &self.shared;
        let wallet_id = descriptor.id.as_str();
        let polled = BoundedRetry::new(retry::constant(self.config.mobile_poll_interval))
            .deadline(self.config.mobile_timeout)
            .cancel_on(cancel)
            .run(move || async move {
                if !shared.session.is_current(token) {
                    return Err(AttemptError::Permanent(Error::Superseded));
                }
                // Only the wallet that was launched may complete the attempt
                match WalletRegistry::detect(env)
                    .into_iter()
                    .find(|d| d.id == wallet_id)
                    .and_then(|d| d.provider())
                {
                    Some(provider) => Ok(provider),
                    None => {
                        debug!("{} not injected yet", wallet_id);
                        Err(AttemptError::Transient(Error::ProviderNotFound(wallet_id.to_string())))
                    }
                }
            })
            .await;

        match polled {
            Ok(provider) => Ok(Some(provider)),
            Err(RetryError::Cancelled { .. }) => Ok(None),
            Err(RetryError::Permanent { error, .. }) => Err(error),
            Err(RetryError::DeadlineElapsed { .. }) | Err(RetryError::Exhausted { .. }) => Err(
                Error::MobileTimeout(self.config.mobile_timeout.as_millis() as u64),
            ),
        }
    }
}
