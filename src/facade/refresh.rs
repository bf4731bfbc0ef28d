//! Data refresh
//!
//! All reads of one refresh run concurrently. A failed read falls back to
//! zero and is listed in [`DashboardSnapshot::failed_reads`]; only a refresh
//! where every read fails counts as failed and is retried with exponential
//! backoff.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::abi::{decode_uint, encode_call, parse_quantity, Word};
use super::{signatures, Contracts};
use crate::activity::{ActivityLog, LogCategory};
use crate::error::{Error, Result};
use crate::negotiator::ConnectionListener;
use crate::provider::{Provider, ProviderExt, ProviderHandle};
use crate::retry::{self, AttemptError, BoundedRetry, RetryError};
use crate::types::Address;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Retries after the first failed refresh
    pub max_retries: u32,
    /// First backoff delay, doubled on every retry
    pub base_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub native: u128,
    pub token: u128,
    /// Token allowance granted to the staking contract
    pub allowance: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StakePosition {
    pub staked: u128,
    pub earned: u128,
    pub staked_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub total_supply: u128,
    pub total_staked: u128,
    pub reward_rate: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub account: Address,
    pub balances: Balances,
    pub position: StakePosition,
    pub stats: ProtocolStats,
    /// Reads that failed and were reported as zero
    pub failed_reads: Vec<&'static str>,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Retries of the refresh in progress; back to 0 once it settles
    pub retry_count: u32,
    /// Retries since startup
    pub total_retries: u64,
    pub last_error: Option<String>,
}

pub struct DataRefresh {
    contracts: Contracts,
    config: RefreshConfig,
    activity: Arc<ActivityLog>,
    snapshot: RwLock<Option<DashboardSnapshot>>,
    status: Mutex<SyncStatus>,
}

impl DataRefresh {
    pub fn new(contracts: Contracts, config: RefreshConfig, activity: Arc<ActivityLog>) -> Self {
        Self {
            contracts,
            config,
            activity,
            snapshot: RwLock::new(None),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn contracts(&self) -> &Contracts {
        &self.contracts
    }

    /// Latest successful snapshot
    pub fn snapshot(&self) -> Option<DashboardSnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.lock_status().clone()
    }

    pub fn clear(&self) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Read everything for `account`, retrying while every read fails
    ///
    /// On give-up a SYSTEM error entry is logged and
    /// [`Error::SyncFailure`] returned.
    pub async fn refresh(&self, account: Address, provider: &ProviderHandle) -> Result<DashboardSnapshot> {
        let provider = provider.as_ref();
        let attempt = move || async move {
            match self.read_all(provider, account).await {
                Ok(snapshot) => Ok(snapshot),
                Err(e) => {
                    debug!("Refresh for {} failed: {}", account.short(), e);
                    Err(AttemptError::Transient(e))
                }
            }
        };

        let outcome = BoundedRetry::new(retry::doubling(self.config.base_delay))
            .max_retries(self.config.max_retries)
            .on_retry(|retry, delay| {
                let mut status = self.lock_status();
                status.retry_count = retry;
                status.total_retries += 1;
                warn!("Data refresh failed, retry {} in {:?}", retry, delay);
            })
            .run_or_else(attempt, |failure| {
                self.activity.error(
                    LogCategory::System,
                    format!("Data synchronization failed after {} attempts", failure.attempts()),
                    None,
                );
            })
            .await;

        let mut status = self.lock_status();
        status.retry_count = 0;
        match outcome {
            Ok(snapshot) => {
                status.last_error = None;
                drop(status);
                if !snapshot.failed_reads.is_empty() {
                    warn!("Partial refresh, defaulted to zero: {:?}", snapshot.failed_reads);
                }
                *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(failure) => {
                let reason = match &failure {
                    RetryError::Exhausted { last, .. } | RetryError::Permanent { error: last, .. } => {
                        last.to_string()
                    }
                    RetryError::DeadlineElapsed { .. } => "deadline elapsed".to_string(),
                    RetryError::Cancelled { .. } => "cancelled".to_string(),
                };
                status.last_error = Some(reason.clone());
                Err(Error::SyncFailure {
                    attempts: failure.attempts(),
                    reason,
                })
            }
        }
    }

    /// One refresh attempt; fails only if every read failed
    async fn read_all(&self, provider: &dyn Provider, account: Address) -> Result<DashboardSnapshot> {
        let token = self.contracts.token;
        let staking = self.contracts.staking;
        let holder = [Word::Address(account)];
        let spender = [Word::Address(account), Word::Address(staking)];

        let (native, balance, allowance, total_supply, staked, earned, since, total_staked, reward_rate) = tokio::join!(
            async { parse_quantity(&provider.native_balance(account).await?) },
            read_uint(provider, token, signatures::BALANCE_OF, &holder),
            read_uint(provider, token, signatures::ALLOWANCE, &spender),
            read_uint(provider, token, signatures::TOTAL_SUPPLY, &[]),
            read_uint(provider, staking, signatures::STAKED_BALANCE, &holder),
            read_uint(provider, staking, signatures::EARNED, &holder),
            read_uint(provider, staking, signatures::STAKE_TIMESTAMP, &holder),
            read_uint(provider, staking, signatures::TOTAL_STAKED, &[]),
            read_uint(provider, staking, signatures::REWARD_RATE, &[]),
        );

        let reads = [
            ("native balance", native),
            ("token balance", balance),
            ("allowance", allowance),
            ("total supply", total_supply),
            ("staked balance", staked),
            ("earned rewards", earned),
            ("stake timestamp", since),
            ("total staked", total_staked),
            ("reward rate", reward_rate),
        ];

        let mut failed_reads = Vec::new();
        let mut first_error = None;
        let mut values = [0u128; 9];
        for (slot, (name, read)) in values.iter_mut().zip(reads) {
            match read {
                Ok(value) => *slot = value,
                Err(e) => {
                    debug!("Read of {} failed: {}", name, e);
                    failed_reads.push(name);
                    first_error.get_or_insert(e);
                }
            }
        }

        if failed_reads.len() == values.len() {
            return Err(first_error.unwrap_or_else(|| Error::Internal("no reads".to_string())));
        }

        let [native, token_balance, allowance, total_supply, staked, earned, since, total_staked, reward_rate] = values;
        Ok(DashboardSnapshot {
            account,
            balances: Balances {
                native,
                token: token_balance,
                allowance,
            },
            position: StakePosition {
                staked,
                earned,
                staked_since: timestamp(since),
            },
            stats: ProtocolStats {
                total_supply,
                total_staked,
                reward_rate,
            },
            failed_reads,
            refreshed_at: Utc::now(),
        })
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, SyncStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn read_uint(provider: &dyn Provider, to: Address, signature: &str, args: &[Word]) -> Result<u128> {
    let result = provider.eth_call(to, encode_call(signature, args)).await?;
    decode_uint(&result)
}

fn timestamp(seconds: u128) -> Option<DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    i64::try_from(seconds)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
}

#[async_trait]
impl ConnectionListener for DataRefresh {
    async fn on_connected(&self, account: Address, provider: ProviderHandle) {
        match self.refresh(account, &provider).await {
            Ok(_) => info!("Dashboard refreshed for {}", account.short()),
            Err(e) => warn!("Dashboard refresh for {} failed: {}", account.short(), e),
        }
    }

    async fn on_disconnected(&self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::LogStatus;
    use crate::facade::fixtures::{called, chain_state, contracts};
    use crate::provider::codes;
    use crate::provider::scripted::{Reply, ScriptedProvider};
    use crate::provider::ProviderRpcError;
    use serde_json::json;
    use tokio::time::Instant;

    fn account() -> Address {
        "0xabcd000000000000000000000000000000001234".parse().unwrap()
    }

    fn facade(activity: Arc<ActivityLog>) -> DataRefresh {
        DataRefresh::new(contracts(), RefreshConfig::default(), activity)
    }

    fn unavailable() -> Reply {
        Reply::Error(ProviderRpcError::new(codes::RESOURCE_UNAVAILABLE, "node unavailable"))
    }

    #[tokio::test]
    async fn test_refresh_reads_everything() {
        let activity = Arc::new(ActivityLog::default());
        let refresh = facade(activity.clone());
        let provider: ProviderHandle = ScriptedProvider::new(|m, p| Reply::Value(chain_state(m, p)));

        let snapshot = refresh.refresh(account(), &provider).await.unwrap();

        assert_eq!(snapshot.balances.native, 1_000_000_000_000_000_000);
        assert_eq!(snapshot.balances.token, 500);
        assert_eq!(snapshot.balances.allowance, 100);
        assert_eq!(snapshot.position.staked, 250);
        assert_eq!(snapshot.position.earned, 7);
        assert_eq!(
            snapshot.position.staked_since.unwrap().timestamp(),
            1_700_000_000
        );
        assert_eq!(snapshot.stats.total_supply, 1_000_000);
        assert_eq!(snapshot.stats.total_staked, 90_000);
        assert_eq!(snapshot.stats.reward_rate, 3);
        assert!(snapshot.failed_reads.is_empty());
        assert!(refresh.snapshot().is_some());
        assert!(activity.is_empty());
    }

    #[tokio::test]
    async fn test_failed_reads_default_to_zero() {
        let refresh = facade(Arc::new(ActivityLog::default()));
        let provider: ProviderHandle = ScriptedProvider::new(|method, params| {
            match (method, called(params)) {
                ("eth_call", Some(signatures::EARNED)) | ("eth_getBalance", _) => unavailable(),
                _ => Reply::Value(chain_state(method, params)),
            }
        });

        let snapshot = refresh.refresh(account(), &provider).await.unwrap();

        assert_eq!(snapshot.position.earned, 0);
        assert_eq!(snapshot.balances.native, 0);
        assert_eq!(snapshot.balances.token, 500);
        assert_eq!(snapshot.failed_reads, vec!["native balance", "earned rewards"]);
        assert_eq!(refresh.status().total_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_until_success() {
        let refresh = facade(Arc::new(ActivityLog::default()));
        let start = Instant::now();
        // Node down for the first two attempts (t=0s and t=1s)
        let provider: ProviderHandle = ScriptedProvider::new(move |method, params| {
            if start.elapsed() < Duration::from_millis(2500) {
                unavailable()
            } else {
                Reply::Value(chain_state(method, params))
            }
        });

        let snapshot = refresh.refresh(account(), &provider).await.unwrap();

        // Retries after 1s and 2s; the third attempt at t=3s succeeds
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
        assert_eq!(snapshot.balances.token, 500);

        let status = refresh.status();
        assert_eq!(status.total_retries, 2);
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let activity = Arc::new(ActivityLog::default());
        let refresh = facade(activity.clone());
        let provider: ProviderHandle = ScriptedProvider::new(|_, _| unavailable());

        let start = Instant::now();
        let err = refresh.refresh(account(), &provider).await.unwrap_err();

        assert!(matches!(err, Error::SyncFailure { attempts: 4, .. }));
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::SyncFailure));
        // 1s + 2s + 4s of backoff
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_millis(7100));

        let entries = activity.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, LogCategory::System);
        assert_eq!(entries[0].status, LogStatus::Error);

        let status = refresh.status();
        assert_eq!(status.total_retries, 3);
        assert_eq!(status.retry_count, 0);
        assert!(status.last_error.is_some());
        assert!(refresh.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_unlimited_allowance_saturates() {
        let refresh = facade(Arc::new(ActivityLog::default()));
        let provider: ProviderHandle = ScriptedProvider::new(|method, params| match called(params) {
            Some(signatures::ALLOWANCE) => Reply::Value(json!(format!("0x{}", "f".repeat(64)))),
            _ => Reply::Value(chain_state(method, params)),
        });

        let snapshot = refresh.refresh(account(), &provider).await.unwrap();
        assert_eq!(snapshot.balances.allowance, u128::MAX);
        assert_eq!(snapshot.balances.token, 500);
    }

    #[tokio::test]
    async fn test_disconnect_clears_snapshot() {
        let refresh = facade(Arc::new(ActivityLog::default()));
        let provider: ProviderHandle = ScriptedProvider::new(|m, p| Reply::Value(chain_state(m, p)));

        refresh.on_connected(account(), provider).await;
        assert!(refresh.snapshot().is_some());

        refresh.on_disconnected().await;
        assert!(refresh.snapshot().is_none());
    }
}
