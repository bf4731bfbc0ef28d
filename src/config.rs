//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::facade::{Contracts, MutationConfig, RefreshConfig};
use crate::negotiator::{ChainSpec, NegotiatorConfig};
use crate::provider::NativeCurrency;
use crate::types::{Address, ChainId};

/// Largest number of decimals a u128 amount can be scaled by
const MAX_DECIMALS: u32 = 38;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
}

/// The single chain the application targets
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_chain_name")]
    pub name: String,
    #[serde(default = "default_chain_rpc_urls")]
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_currency_name")]
    pub currency_name: String,
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    #[serde(default = "default_decimals")]
    pub currency_decimals: u8,
    #[serde(default = "default_explorer_url")]
    pub explorer_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    /// Staking token (ERC-20 with faucet)
    #[serde(default)]
    pub token: Address,
    #[serde(default)]
    pub staking: Address,
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Budget for the interactive account request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_mobile_poll_interval_ms")]
    pub mobile_poll_interval_ms: u64,
    #[serde(default = "default_mobile_timeout_ms")]
    pub mobile_timeout_ms: u64,
    #[serde(default = "default_relay_timeout_ms")]
    pub relay_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Retries after a failed dashboard refresh (delays double from base_delay_ms)
    #[serde(default = "default_sync_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_sync_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// File holding the last connected wallet
    #[serde(default = "default_session_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_activity_capacity")]
    pub capacity: usize,
    /// File the CLI keeps the activity log in between runs
    #[serde(default = "default_activity_path")]
    pub path: PathBuf,
}

/// Host environment seen by the command line
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_dapp_url")]
    pub dapp_url: String,
    /// Wallet endpoints exposed as injected providers
    #[serde(default)]
    pub wallets: Vec<InjectedWalletConfig>,
}

/// A JSON-RPC endpoint presented as an injected wallet
#[derive(Debug, Clone, Deserialize)]
pub struct InjectedWalletConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub source: InjectionKind,
    /// Brand flags set on the provider (`isMetaMask`, ...)
    #[serde(default)]
    pub flags: Vec<String>,
    /// Global name for `source = "namespace"`
    #[serde(default)]
    pub namespace: Option<String>,
    /// EIP-6963 metadata for `source = "announced"`
    #[serde(default)]
    pub rdns: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionKind {
    #[default]
    Global,
    Namespace,
    ProviderArray,
    Announced,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            name: default_chain_name(),
            rpc_urls: default_chain_rpc_urls(),
            currency_name: default_currency_name(),
            currency_symbol: default_currency_symbol(),
            currency_decimals: default_decimals(),
            explorer_url: default_explorer_url(),
        }
    }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            token: Address::ZERO,
            staking: Address::ZERO,
            token_symbol: default_token_symbol(),
            token_decimals: default_token_decimals(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            mobile_poll_interval_ms: default_mobile_poll_interval_ms(),
            mobile_timeout_ms: default_mobile_timeout_ms(),
            relay_timeout_ms: default_relay_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_sync_max_retries(),
            base_delay_ms: default_sync_base_delay_ms(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            capacity: default_activity_capacity(),
            path: default_activity_path(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            dapp_url: default_dapp_url(),
            wallets: Vec::new(),
        }
    }
}

// Default value functions
fn default_chain_id() -> u64 {
    97
}

fn default_chain_name() -> String {
    "BNB Smart Chain Testnet".to_string()
}

fn default_chain_rpc_urls() -> Vec<String> {
    vec!["https://data-seed-prebsc-1-s1.bnbchain.org:8545".to_string()]
}

fn default_currency_name() -> String {
    "BNB".to_string()
}

fn default_currency_symbol() -> String {
    "tBNB".to_string()
}

fn default_decimals() -> u8 {
    18
}

fn default_explorer_url() -> Option<String> {
    Some("https://testnet.bscscan.com".to_string())
}

fn default_token_symbol() -> String {
    "VELA".to_string()
}

fn default_token_decimals() -> u32 {
    18
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_mobile_poll_interval_ms() -> u64 {
    1_000
}

fn default_mobile_timeout_ms() -> u64 {
    30_000
}

fn default_relay_timeout_ms() -> u64 {
    120_000
}

fn default_sync_max_retries() -> u32 {
    3
}

fn default_sync_base_delay_ms() -> u64 {
    1_000
}

fn default_confirmation_poll_ms() -> u64 {
    1_000
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_session_path() -> PathBuf {
    PathBuf::from(".velacore/session.json")
}

fn default_activity_capacity() -> usize {
    crate::activity::DEFAULT_CAPACITY
}

fn default_activity_path() -> PathBuf {
    PathBuf::from(".velacore/activity.json")
}

fn default_user_agent() -> String {
    format!("velacore-cli/{}", env!("CARGO_PKG_VERSION"))
}

fn default_dapp_url() -> String {
    "https://app.velacore.io".to_string()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (VELACORE__SECTION__KEY)
            .add_source(
                config::Environment::with_prefix("VELACORE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.contracts.token.is_zero() {
            anyhow::bail!("contracts.token must be set to a non-zero address");
        }
        if self.contracts.staking.is_zero() {
            anyhow::bail!("contracts.staking must be set to a non-zero address");
        }
        if self.contracts.token == self.contracts.staking {
            anyhow::bail!("contracts.token and contracts.staking must differ");
        }

        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("chain.rpc_urls must list at least one endpoint");
        }
        for url in &self.chain.rpc_urls {
            url::Url::parse(url).with_context(|| format!("Invalid chain RPC URL: {}", url))?;
        }
        url::Url::parse(&self.environment.dapp_url)
            .with_context(|| format!("Invalid dapp URL: {}", self.environment.dapp_url))?;

        let timeouts = [
            ("connection.request_timeout_ms", self.connection.request_timeout_ms),
            ("connection.mobile_poll_interval_ms", self.connection.mobile_poll_interval_ms),
            ("connection.mobile_timeout_ms", self.connection.mobile_timeout_ms),
            ("connection.relay_timeout_ms", self.connection.relay_timeout_ms),
            ("sync.base_delay_ms", self.sync.base_delay_ms),
            ("sync.confirmation_poll_ms", self.sync.confirmation_poll_ms),
            ("sync.confirmation_timeout_ms", self.sync.confirmation_timeout_ms),
        ];
        for (key, value) in timeouts {
            if value == 0 {
                anyhow::bail!("{} must be positive", key);
            }
        }

        if self.connection.mobile_poll_interval_ms >= self.connection.mobile_timeout_ms {
            anyhow::bail!("connection.mobile_poll_interval_ms must be below mobile_timeout_ms");
        }

        if self.sync.max_retries == 0 {
            anyhow::bail!("sync.max_retries must be at least 1");
        }

        if self.activity.capacity == 0 {
            anyhow::bail!("activity.capacity must be positive");
        }

        // 10^decimals must fit in a u128 amount
        if self.contracts.token_decimals > MAX_DECIMALS {
            anyhow::bail!("contracts.token_decimals must be at most {}", MAX_DECIMALS);
        }
        if u32::from(self.chain.currency_decimals) > MAX_DECIMALS {
            anyhow::bail!("chain.currency_decimals must be at most {}", MAX_DECIMALS);
        }

        for wallet in &self.environment.wallets {
            url::Url::parse(&wallet.rpc_url)
                .with_context(|| format!("Invalid wallet RPC URL: {}", wallet.rpc_url))?;
            match wallet.source {
                InjectionKind::Namespace if wallet.namespace.is_none() => {
                    anyhow::bail!("Wallet {} uses source = \"namespace\" without a namespace", wallet.rpc_url)
                }
                InjectionKind::Announced if wallet.rdns.is_none() => {
                    anyhow::bail!("Wallet {} uses source = \"announced\" without an rdns", wallet.rpc_url)
                }
                _ => {}
            }
        }

        if self.chain.chain_id != default_chain_id() {
            tracing::warn!(
                "Targeting chain {} instead of the default {}",
                self.chain.chain_id,
                default_chain_id()
            );
        }

        Ok(())
    }

    pub fn chain_spec(&self) -> ChainSpec {
        ChainSpec {
            chain_id: ChainId(self.chain.chain_id),
            name: self.chain.name.clone(),
            rpc_urls: self.chain.rpc_urls.clone(),
            native_currency: NativeCurrency {
                name: self.chain.currency_name.clone(),
                symbol: self.chain.currency_symbol.clone(),
                decimals: self.chain.currency_decimals,
            },
            explorer_url: self.chain.explorer_url.clone(),
        }
    }

    pub fn negotiator_config(&self) -> NegotiatorConfig {
        NegotiatorConfig {
            target: self.chain_spec(),
            request_timeout: Duration::from_millis(self.connection.request_timeout_ms),
            mobile_poll_interval: Duration::from_millis(self.connection.mobile_poll_interval_ms),
            mobile_timeout: Duration::from_millis(self.connection.mobile_timeout_ms),
            relay_timeout: Duration::from_millis(self.connection.relay_timeout_ms),
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            max_retries: self.sync.max_retries,
            base_delay: Duration::from_millis(self.sync.base_delay_ms),
        }
    }

    pub fn mutation_config(&self) -> MutationConfig {
        MutationConfig {
            target_chain: ChainId(self.chain.chain_id),
            confirmation_poll: Duration::from_millis(self.sync.confirmation_poll_ms),
            confirmation_timeout: Duration::from_millis(self.sync.confirmation_timeout_ms),
        }
    }

    pub fn contracts(&self) -> Contracts {
        Contracts {
            token: self.contracts.token,
            staking: self.contracts.staking,
            token_symbol: self.contracts.token_symbol.clone(),
            token_decimals: self.contracts.token_decimals,
        }
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let wallets: Vec<String> = self
            .environment
            .wallets
            .iter()
            .map(|w| format!("{:?} {} {:?}", w.source, mask_url(&w.rpc_url), w.flags))
            .collect();

        format!(
            r#"Configuration:
  Chain:
    id: {} ({})
    rpc: {}
    explorer: {}
  Contracts:
    token: {} ({}, {} decimals)
    staking: {}
  Connection:
    request_timeout: {}ms
    mobile_poll_interval: {}ms
    mobile_timeout: {}ms
    relay_timeout: {}ms
  Sync:
    max_retries: {}
    base_delay: {}ms
    confirmation_timeout: {}ms
  Session:
    path: {}
  Activity:
    capacity: {}
    path: {}
  Environment:
    user_agent: {}
    dapp_url: {}
    wallets: {:?}
"#,
            self.chain.chain_id,
            self.chain.name,
            self.chain
                .rpc_urls
                .iter()
                .map(|u| mask_url(u))
                .collect::<Vec<_>>()
                .join(", "),
            self.chain.explorer_url.as_deref().unwrap_or("(none)"),
            self.contracts.token,
            self.contracts.token_symbol,
            self.contracts.token_decimals,
            self.contracts.staking,
            self.connection.request_timeout_ms,
            self.connection.mobile_poll_interval_ms,
            self.connection.mobile_timeout_ms,
            self.connection.relay_timeout_ms,
            self.sync.max_retries,
            self.sync.base_delay_ms,
            self.sync.confirmation_timeout_ms,
            self.session.path.display(),
            self.activity.capacity,
            self.activity.path.display(),
            self.environment.user_agent,
            self.environment.dapp_url,
            wallets,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
