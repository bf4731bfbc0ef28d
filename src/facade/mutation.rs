//! User actions as on-chain transactions
//!
//! Every action follows the same path: submit, log PENDING with the hash,
//! wait for the receipt, log SUCCESS or ERROR from the receipt status, then
//! refresh the dashboard. A receipt without an explicit success status is
//! an error even when the call itself did not revert.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::abi::{decode_uint, encode_call, Word};
use super::refresh::DataRefresh;
use super::{signatures, Contracts};
use crate::activity::{ActivityLog, LogCategory};
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};
use crate::provider::{ProviderExt, ProviderHandle, TransactionReceipt, TransactionRequest};
use crate::retry::{self, AttemptError, BoundedRetry, RetryError};
use crate::session::Session;
use crate::types::{format_units, Address, ChainId, TxHash};

/// A user-initiated contract interaction; amounts are in token base units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve(u128),
    Stake(u128),
    Withdraw(u128),
    ClaimRewards,
    EmergencyWithdraw,
    FaucetClaim,
}

impl Action {
    pub fn category(&self) -> LogCategory {
        match self {
            Action::Approve(_) | Action::Stake(_) => LogCategory::Stake,
            Action::Withdraw(_) => LogCategory::Unstake,
            Action::ClaimRewards | Action::FaucetClaim => LogCategory::Claim,
            Action::EmergencyWithdraw => LogCategory::Emergency,
        }
    }

    fn amount(&self) -> Option<u128> {
        match self {
            Action::Approve(amount) | Action::Stake(amount) | Action::Withdraw(amount) => Some(*amount),
            _ => None,
        }
    }

    fn describe(&self, contracts: &Contracts) -> String {
        let amount = |value: &u128| {
            format!(
                "{} {}",
                format_units(*value, contracts.token_decimals),
                contracts.token_symbol
            )
        };
        match self {
            Action::Approve(value) => format!("Approve {}", amount(value)),
            Action::Stake(value) => format!("Stake {}", amount(value)),
            Action::Withdraw(value) => format!("Withdraw {}", amount(value)),
            Action::ClaimRewards => "Claim rewards".to_string(),
            Action::EmergencyWithdraw => "Emergency withdraw".to_string(),
            Action::FaucetClaim => format!("Faucet claim ({})", contracts.token_symbol),
        }
    }

    /// Target contract and calldata
    fn call(&self, contracts: &Contracts) -> (Address, String) {
        match self {
            Action::Approve(value) => (
                contracts.token,
                encode_call(
                    signatures::APPROVE,
                    &[Word::Address(contracts.staking), Word::Uint(*value)],
                ),
            ),
            Action::Stake(value) => (
                contracts.staking,
                encode_call(signatures::STAKE, &[Word::Uint(*value)]),
            ),
            Action::Withdraw(value) => (
                contracts.staking,
                encode_call(signatures::WITHDRAW, &[Word::Uint(*value)]),
            ),
            Action::ClaimRewards => (contracts.staking, encode_call(signatures::CLAIM_REWARDS, &[])),
            Action::EmergencyWithdraw => (
                contracts.staking,
                encode_call(signatures::EMERGENCY_WITHDRAW, &[]),
            ),
            Action::FaucetClaim => (contracts.token, encode_call(signatures::FAUCET, &[])),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutationConfig {
    pub target_chain: ChainId,
    pub confirmation_poll: Duration,
    pub confirmation_timeout: Duration,
}

/// A confirmed, successful transaction
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub hash: TxHash,
    pub receipt: TransactionReceipt,
}

pub struct MutationFacade {
    config: MutationConfig,
    session: Arc<Session>,
    refresh: Arc<DataRefresh>,
    activity: Arc<ActivityLog>,
    notifier: Arc<dyn Notifier>,
}

impl MutationFacade {
    pub fn new(
        config: MutationConfig,
        session: Arc<Session>,
        refresh: Arc<DataRefresh>,
        activity: Arc<ActivityLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            session,
            refresh,
            activity,
            notifier,
        }
    }

    /// Submit `action` from the connected account and follow it to its receipt
    pub async fn execute(&self, action: Action) -> Result<TxOutcome> {
        let contracts = self.refresh.contracts();
        let label = action.describe(contracts);

        let (account, provider, hash) = match self.submit(action, contracts).await {
            Ok(submitted) => submitted,
            Err(e) => {
                self.activity
                    .error(action.category(), format!("{} failed: {}", label, e), None);
                self.notifier
                    .notify(Notification::error(format!("{} failed: {}", label, e)));
                return Err(e);
            }
        };

        self.activity.pending(
            action.category(),
            format!("{} submitted", label),
            Some(hash.clone()),
        );
        self.notifier
            .notify(Notification::info(format!("{} submitted: {}", label, hash)));

        let receipt = match self.await_receipt(&provider, &hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.activity.error(
                    action.category(),
                    format!("{} not confirmed: {}", label, e),
                    Some(hash.clone()),
                );
                self.notifier
                    .notify(Notification::error(format!("{} not confirmed", label)));
                return Err(e);
            }
        };

        let outcome = if receipt.succeeded() {
            info!("{} confirmed in block {:?}", label, receipt.block_number);
            self.activity.success(
                action.category(),
                format!("{} confirmed", label),
                Some(hash.clone()),
            );
            self.notifier
                .notify(Notification::success(format!("{} confirmed", label)));
            Ok(TxOutcome { hash, receipt })
        } else {
            self.activity.error(
                action.category(),
                format!("{} reverted (status {})", label, receipt.status.as_deref().unwrap_or("missing")),
                Some(hash.clone()),
            );
            self.notifier
                .notify(Notification::error(format!("{} reverted", label)));
            Err(Error::TransactionReverted(hash.to_string()))
        };

        // A failed refresh has already logged itself
        if let Err(e) = self.refresh.refresh(account, &provider).await {
            warn!("Refresh after {} failed: {}", label, e);
        }

        outcome
    }

    /// Stake `amount`, approving the staking contract first when the
    /// current allowance does not cover it
    pub async fn stake_with_approval(&self, amount: u128) -> Result<TxOutcome> {
        let (account, provider) = self.connection()?;
        let contracts = self.refresh.contracts();

        let allowance = provider
            .eth_call(
                contracts.token,
                encode_call(
                    signatures::ALLOWANCE,
                    &[Word::Address(account), Word::Address(contracts.staking)],
                ),
            )
            .await
            .and_then(|result| decode_uint(&result))?;

        if allowance < amount {
            info!(
                "Allowance {} below {}, approving first",
                allowance, amount
            );
            self.execute(Action::Approve(amount)).await?;
        }

        self.execute(Action::Stake(amount)).await
    }

    async fn submit(
        &self,
        action: Action,
        contracts: &Contracts,
    ) -> Result<(Address, ProviderHandle, TxHash)> {
        if action.amount() == Some(0) {
            return Err(Error::InvalidAmount("amount must be greater than zero".to_string()));
        }

        let (account, provider) = self.connection()?;

        let chain = provider.chain_id().await?;
        if chain != self.config.target_chain {
            return Err(Error::UnsupportedChain(format!(
                "wallet is on chain {}, expected {}",
                chain, self.config.target_chain
            )));
        }

        let (to, data) = action.call(contracts);
        let hash = provider
            .send_transaction(&TransactionRequest {
                from: account,
                to,
                data,
                value: None,
            })
            .await?;

        Ok((account, provider, hash))
    }

    fn connection(&self) -> Result<(Address, ProviderHandle)> {
        let state = self.session.snapshot();
        let active = state.active().ok_or(Error::NotConnected)?;
        Ok((active.account, active.provider.clone()))
    }

    async fn await_receipt(&self, provider: &ProviderHandle, hash: &TxHash) -> Result<TransactionReceipt> {
        let provider = provider.as_ref();
        let polled = BoundedRetry::new(retry::constant(self.config.confirmation_poll))
            .deadline(self.config.confirmation_timeout)
            .run(move || async move {
                match provider.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => Ok(receipt),
                    Ok(None) => Err(AttemptError::Transient(Error::ConfirmationTimeout(hash.to_string()))),
                    Err(e) if e.is_retryable() => Err(AttemptError::Transient(e)),
                    Err(e) => Err(AttemptError::Permanent(e)),
                }
            })
            .await;

        match polled {
            Ok(receipt) => Ok(receipt),
            Err(RetryError::Permanent { error, .. }) => Err(error),
            Err(_) => Err(Error::ConfirmationTimeout(hash.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::LogStatus;
    use crate::facade::abi::selector;
    use crate::facade::fixtures::{chain_state, contracts};
    use crate::facade::RefreshConfig;
    use crate::notify::{ChannelNotifier, NotificationLevel};
    use crate::provider::codes;
    use crate::provider::scripted::{Reply, ScriptedProvider};
    use crate::provider::ProviderRpcError;
    use crate::session::ActiveConnection;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const HASH: &str = "0xabababababababababababababababababababababababababababababababab";

    fn account() -> Address {
        "0xabcd000000000000000000000000000000001234".parse().unwrap()
    }

    struct Fixture {
        facade: MutationFacade,
        refresh: Arc<DataRefresh>,
        activity: Arc<ActivityLog>,
        toasts: mpsc::UnboundedReceiver<Notification>,
    }

    fn fixture(provider: Option<ProviderHandle>) -> Fixture {
        let session = Arc::new(Session::new());
        if let Some(provider) = provider {
            let token = session.begin_attempt();
            session
                .commit(
                    token,
                    ActiveConnection {
                        account: account(),
                        provider,
                        wallet_id: "metamask".to_string(),
                    },
                )
                .unwrap();
        }

        let activity = Arc::new(ActivityLog::default());
        let refresh = Arc::new(DataRefresh::new(
            contracts(),
            RefreshConfig::default(),
            activity.clone(),
        ));
        let (notifier, toasts) = ChannelNotifier::new();
        let facade = MutationFacade::new(
            MutationConfig {
                target_chain: ChainId(97),
                confirmation_poll: Duration::from_secs(1),
                confirmation_timeout: Duration::from_secs(120),
            },
            session,
            refresh.clone(),
            activity.clone(),
            Arc::new(notifier),
        );

        Fixture {
            facade,
            refresh,
            activity,
            toasts,
        }
    }

    /// Wallet on chain 97 that mines every transaction with `status`
    /// after `pending_polls` empty receipt lookups
    fn miner(status: &'static str, pending_polls: usize) -> Arc<ScriptedProvider> {
        let lookups = AtomicUsize::new(0);
        ScriptedProvider::new(move |method, params| match method {
            "eth_chainId" => Reply::Value(json!("0x61")),
            "eth_sendTransaction" => Reply::Value(json!(HASH)),
            "eth_getTransactionReceipt" => {
                if lookups.fetch_add(1, Ordering::SeqCst) < pending_polls {
                    Reply::Value(Value::Null)
                } else {
                    Reply::Value(json!({
                        "transactionHash": HASH,
                        "status": status,
                        "blockNumber": "0x10",
                        "gasUsed": "0x5208",
                    }))
                }
            }
            _ => Reply::Value(chain_state(method, params)),
        })
    }

    fn statuses(activity: &ActivityLog) -> Vec<LogStatus> {
        activity.entries().iter().map(|e| e.status).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_stake() {
        let provider = miner("0x1", 2);
        let mut f = fixture(Some(provider.clone()));

        let outcome = f.facade.execute(Action::Stake(1_500_000_000_000_000_000)).await.unwrap();

        assert_eq!(outcome.hash.as_str(), HASH);
        assert_eq!(statuses(&f.activity), vec![LogStatus::Pending, LogStatus::Success]);
        let entries = f.activity.entries();
        assert!(entries.iter().all(|e| e.category == LogCategory::Stake));
        assert_eq!(entries[0].tx_hash.as_ref().map(TxHash::as_str), Some(HASH));
        assert_eq!(entries[1].message, "Stake 1.5 VELA confirmed");

        let tx = provider.last_params("eth_sendTransaction").unwrap();
        assert_eq!(tx[0]["to"], "0x2000000000000000000000000000000000000002");
        assert_eq!(provider.calls("eth_getTransactionReceipt"), 3);

        // Dashboard refreshed after confirmation
        assert_eq!(f.refresh.snapshot().unwrap().balances.token, 500);

        let levels: Vec<NotificationLevel> = std::iter::from_fn(|| f.toasts.try_recv().ok())
            .map(|n| n.level)
            .collect();
        assert_eq!(levels, vec![NotificationLevel::Info, NotificationLevel::Success]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_an_error() {
        let f = fixture(Some(miner("0x0", 0)));

        let err = f.facade.execute(Action::ClaimRewards).await.unwrap_err();

        assert_eq!(err, Error::TransactionReverted(HASH.to_string()));
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::TransactionReverted));
        assert_eq!(statuses(&f.activity), vec![LogStatus::Pending, LogStatus::Error]);
        assert!(f.activity.entries().iter().all(|e| e.category == LogCategory::Claim));
        assert!(f.refresh.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_rejected_submission_logs_error_without_pending() {
        let provider: ProviderHandle = ScriptedProvider::new(|method, _| match method {
            "eth_chainId" => Reply::Value(json!("0x61")),
            "eth_sendTransaction" => {
                Reply::Error(ProviderRpcError::new(codes::USER_REJECTED, "User denied transaction signature."))
            }
            _ => Reply::Value(Value::Null),
        });
        let mut f = fixture(Some(provider));

        let err = f.facade.execute(Action::Withdraw(10)).await.unwrap_err();

        assert!(matches!(err, Error::UserRejected(_)));
        assert_eq!(statuses(&f.activity), vec![LogStatus::Error]);
        assert_eq!(f.activity.entries()[0].category, LogCategory::Unstake);
        assert_eq!(f.toasts.try_recv().unwrap().level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_wrong_chain_is_refused_before_sending() {
        let provider = ScriptedProvider::wallet(vec![account()], 1);
        let f = fixture(Some(provider.clone()));

        let err = f.facade.execute(Action::FaucetClaim).await.unwrap_err();

        assert!(matches!(err, Error::UnsupportedChain(_)));
        assert_eq!(provider.calls("eth_sendTransaction"), 0);
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let f = fixture(None);
        let err = f.facade.execute(Action::EmergencyWithdraw).await.unwrap_err();

        assert_eq!(err, Error::NotConnected);
        assert_eq!(f.activity.entries()[0].category, LogCategory::Emergency);
    }

    #[tokio::test]
    async fn test_zero_amount_is_rejected() {
        let provider = miner("0x1", 0);
        let f = fixture(Some(provider.clone()));

        let err = f.facade.execute(Action::Stake(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        assert_eq!(provider.calls("eth_sendTransaction"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmined_transaction_times_out() {
        let provider = miner("0x1", usize::MAX);
        let f = fixture(Some(provider));

        let err = f.facade.execute(Action::Approve(5)).await.unwrap_err();

        assert!(matches!(err, Error::ConfirmationTimeout(_)));
        assert_eq!(statuses(&f.activity), vec![LogStatus::Pending, LogStatus::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_with_approval_approves_when_allowance_is_short() {
        // Fixture allowance is 100
        let provider = miner("0x1", 0);
        let f = fixture(Some(provider.clone()));

        f.facade.stake_with_approval(1_000).await.unwrap();

        assert_eq!(provider.calls("eth_sendTransaction"), 2);
        let messages: Vec<String> = f.activity.entries().into_iter().map(|e| e.message).collect();
        assert!(messages[0].starts_with("Approve"));
        assert!(messages[2].starts_with("Stake"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_with_sufficient_allowance_skips_approval() {
        let provider = miner("0x1", 0);
        let f = fixture(Some(provider.clone()));

        f.facade.stake_with_approval(50).await.unwrap();

        assert_eq!(provider.calls("eth_sendTransaction"), 1);
        let sent = provider.last_params("eth_sendTransaction").unwrap();
        assert!(sent[0]["data"]
            .as_str()
            .unwrap()
            .starts_with(&format!("0x{}", hex::encode(selector(signatures::STAKE)))));
    }
}
