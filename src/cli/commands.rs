//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityLog;
use crate::config::{Config, InjectionKind};
use crate::facade::{Action, DashboardSnapshot, DataRefresh, MutationFacade, TxOutcome};
use crate::negotiator::ConnectionNegotiator;
use crate::notify::{Notifier, TracingNotifier};
use crate::provider::{HttpProvider, ProviderHandle};
use crate::registry::{
    Availability, Environment, InjectedProvider, InjectionSource, LoggingLauncher, ProviderInfo,
    StaticEnvironment, WalletDescriptor, WalletRegistry,
};
use crate::session::{ConnectionState, FileSessionStore, Session};
use crate::types::{format_units, parse_units};

/// Everything a command needs, wired from the configuration
pub struct AppContext {
    pub config: Config,
    pub environment: Arc<StaticEnvironment>,
    pub activity: Arc<ActivityLog>,
    pub negotiator: ConnectionNegotiator,
    pub refresh: Arc<DataRefresh>,
    pub mutations: MutationFacade,
}

impl AppContext {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = Arc::new(build_environment(config)?);

        let activity = match ActivityLog::load(&config.activity.path, config.activity.capacity) {
            Ok(log) => log,
            Err(e) => {
                warn!("Starting with an empty activity log: {}", e);
                ActivityLog::new(config.activity.capacity)
            }
        };
        let activity = Arc::new(activity);

        let session = Arc::new(Session::new());
        let store = Arc::new(FileSessionStore::new(&config.session.path));
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
        let refresh = Arc::new(DataRefresh::new(
            config.contracts(),
            config.refresh_config(),
            activity.clone(),
        ));

        let negotiator = ConnectionNegotiator::builder(
            config.negotiator_config(),
            session.clone(),
            store,
            activity.clone(),
        )
        .notifier(notifier.clone())
        .listener(refresh.clone())
        .launcher(Arc::new(LoggingLauncher))
        .build();

        let mutations = MutationFacade::new(
            config.mutation_config(),
            session,
            refresh.clone(),
            activity.clone(),
            notifier,
        );

        Ok(Self {
            config: config.clone(),
            environment,
            activity,
            negotiator,
            refresh,
            mutations,
        })
    }

    pub fn wallets(&self) -> Vec<WalletDescriptor> {
        WalletRegistry::scan(self.environment.as_ref())
    }

    /// Silent reconnection from the session file
    pub async fn restore(&self) -> Option<ConnectionState> {
        self.negotiator.reconnect_silently(&self.wallets()).await
    }

    /// Restore the session or fail with a hint to connect first
    async fn require_connection(&self) -> Result<ConnectionState> {
        match self.restore().await {
            Some(state) => Ok(state),
            None => anyhow::bail!("No wallet connected. Run `velacore connect <wallet>` first."),
        }
    }

    fn persist_activity(&self) {
        if let Err(e) = self.activity.save(&self.config.activity.path) {
            warn!("Failed to save activity log: {}", e);
        }
    }
}

/// Expose the configured JSON-RPC endpoints as injected wallet providers
pub fn build_environment(config: &Config) -> Result<StaticEnvironment> {
    let env = StaticEnvironment::new(&config.environment.user_agent, &config.environment.dapp_url);
    let timeout = Duration::from_millis(config.connection.request_timeout_ms);
    let mut array_index = 0;

    for wallet in &config.environment.wallets {
        let provider = HttpProvider::new(&wallet.rpc_url, timeout)
            .with_context(|| format!("Failed to create provider for {}", wallet.rpc_url))?;
        let handle: ProviderHandle = Arc::new(provider);

        let source = match wallet.source {
            InjectionKind::Global => InjectionSource::Global,
            InjectionKind::Namespace => {
                InjectionSource::Namespace(wallet.namespace.clone().unwrap_or_default())
            }
            InjectionKind::ProviderArray => {
                array_index += 1;
                InjectionSource::ProviderArray(array_index - 1)
            }
            InjectionKind::Announced => {
                let rdns = wallet.rdns.clone().unwrap_or_default();
                let info = ProviderInfo {
                    uuid: uuid::Uuid::new_v4().to_string(),
                    name: wallet.name.clone().unwrap_or_else(|| rdns.clone()),
                    icon: String::new(),
                    rdns,
                };
                env.announce(info, handle);
                continue;
            }
        };

        let injected = wallet
            .flags
            .iter()
            .fold(InjectedProvider::new(source, handle), |p, flag| p.with_flag(flag));
        debug!("Injected {} as {:?}", wallet.rpc_url, injected.source);
        env.inject(injected);
    }

    Ok(env)
}

/// List wallets available in the configured environment
pub async fn wallets(config: &Config) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let platform = crate::registry::Platform::from_user_agent(&ctx.environment.user_agent());

    println!("\n=== AVAILABLE WALLETS ({:?}) ===\n", platform);
    println!("{:<16} {:<22} {:<12} {}", "ID", "NAME", "METHOD", "EVIDENCE");
    println!("{}", "-".repeat(64));

    for wallet in ctx.wallets() {
        let method = match &wallet.availability {
            Availability::Injected(_) => "injected",
            Availability::DeepLink(_) => "deep link",
            Availability::Relay => "relay",
        };
        let evidence = wallet
            .evidence
            .map(|e| format!("{:?}", e))
            .unwrap_or_else(|| "-".to_string());

        println!("{:<16} {:<22} {:<12} {}", wallet.id, wallet.display_name, method, evidence);
    }

    println!();
    Ok(())
}

/// Connect to a wallet by id
pub async fn connect(config: &Config, wallet_id: &str, mobile: bool) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let descriptors = ctx.wallets();
    let descriptor = descriptors
        .iter()
        .find(|d| d.id == wallet_id)
        .ok_or_else(|| anyhow::anyhow!("Wallet {} is not available here. Run `velacore wallets`.", wallet_id))?;

    info!("Connecting to {}...", descriptor.display_name);

    let result = if mobile {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        match ctx
            .negotiator
            .connect_mobile(descriptor, ctx.environment.as_ref(), cancel)
            .await
        {
            Ok(Some(state)) => Ok(state),
            Ok(None) => {
                println!("Connection cancelled.");
                ctx.persist_activity();
                return Ok(());
            }
            Err(e) => Err(e),
        }
    } else {
        ctx.negotiator.connect(descriptor).await
    };

    ctx.persist_activity();
    let state = result.with_context(|| format!("Failed to connect to {}", descriptor.display_name))?;

    if let Some(account) = state.account() {
        println!("\nConnected {} as {}", descriptor.display_name, account);
    }
    if let Some(snapshot) = ctx.refresh.snapshot() {
        print_snapshot(&ctx, &snapshot);
    }

    Ok(())
}

/// Show the connection and the dashboard
pub async fn status(config: &Config) -> Result<()> {
    let ctx = AppContext::new(config)?;

    println!("\n=== VELACORE STATUS ===\n");

    let Some(state) = ctx.restore().await else {
        println!("Wallet: not connected");
        println!("Phase: {:?}", ctx.negotiator.phase());
        return Ok(());
    };

    println!("Wallet: {}", state.connected_wallet_id().unwrap_or("-"));
    if let Some(account) = state.account() {
        println!("Account: {}", account);
    }

    // Reconnection refreshes through the listener
    match ctx.refresh.snapshot() {
        Some(snapshot) => print_snapshot(&ctx, &snapshot),
        None => println!("\nDashboard unavailable (see logs)"),
    }

    let sync = ctx.refresh.status();
    println!("\nSync retries since start: {}", sync.total_retries);
    if let Some(error) = sync.last_error {
        println!("Last sync error: {}", error);
    }

    ctx.persist_activity();
    Ok(())
}

/// Forget the connected wallet
pub async fn disconnect(config: &Config) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let restored = ctx.restore().await;

    ctx.negotiator.disconnect().await;
    ctx.persist_activity();

    match restored.as_ref().and_then(ConnectionState::connected_wallet_id) {
        Some(wallet_id) => println!("Disconnected {}", wallet_id),
        None => println!("No wallet was connected; session hint cleared."),
    }
    Ok(())
}

/// Approve the staking contract to spend tokens
pub async fn approve(config: &Config, amount: &str) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let amount = parse_units(amount, config.contracts.token_decimals)?;
    run_action(&ctx, Action::Approve(amount)).await
}

/// Stake tokens, approving first when the allowance is short
pub async fn stake(config: &Config, amount: &str) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let amount = parse_units(amount, config.contracts.token_decimals)?;
    ctx.require_connection().await?;

    let result = ctx.mutations.stake_with_approval(amount).await;
    ctx.persist_activity();
    report_outcome(&ctx, result)
}

/// Withdraw staked tokens
pub async fn unstake(config: &Config, amount: &str) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let amount = parse_units(amount, config.contracts.token_decimals)?;
    run_action(&ctx, Action::Withdraw(amount)).await
}

/// Claim pending rewards
pub async fn claim(config: &Config) -> Result<()> {
    let ctx = AppContext::new(config)?;
    run_action(&ctx, Action::ClaimRewards).await
}

/// Claim test tokens from the faucet
pub async fn faucet(config: &Config) -> Result<()> {
    let ctx = AppContext::new(config)?;
    run_action(&ctx, Action::FaucetClaim).await
}

/// Withdraw the whole stake, forfeiting rewards
pub async fn emergency_withdraw(config: &Config, force: bool) -> Result<()> {
    let ctx = AppContext::new(config)?;
    ctx.require_connection().await?;

    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Emergency withdraw your whole stake? Pending rewards are forfeited.")
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Emergency withdraw cancelled by user");
            return Ok(());
        }
    }

    let result = ctx.mutations.execute(Action::EmergencyWithdraw).await;
    ctx.persist_activity();
    report_outcome(&ctx, result)
}

/// Show the activity log, newest first
pub async fn logs(config: &Config, limit: usize) -> Result<()> {
    let activity = ActivityLog::load(&config.activity.path, config.activity.capacity)
        .context("Failed to load activity log")?;

    println!("\n=== ACTIVITY ===\n");

    if activity.is_empty() {
        println!("No activity recorded.");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<8} {}", "TIME", "CATEGORY", "STATUS", "MESSAGE");
    println!("{}", "-".repeat(80));

    for entry in activity.recent(limit) {
        println!(
            "{:<20} {:<10} {:<8} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.category,
            entry.status,
            entry.message
        );
        if let Some(hash) = &entry.tx_hash {
            println!("{:<40} tx {}", "", hash);
        }
    }

    println!();
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

async fn run_action(ctx: &AppContext, action: Action) -> Result<()> {
    ctx.require_connection().await?;
    let result = ctx.mutations.execute(action).await;
    ctx.persist_activity();
    report_outcome(ctx, result)
}

fn report_outcome(ctx: &AppContext, result: crate::error::Result<TxOutcome>) -> Result<()> {
    let outcome = result?;

    println!("\nTransaction confirmed!");
    println!("Hash: {}", outcome.hash);
    if let Some(explorer) = &ctx.config.chain.explorer_url {
        println!("View on explorer: {}/tx/{}", explorer.trim_end_matches('/'), outcome.hash);
    }
    if let Some(snapshot) = ctx.refresh.snapshot() {
        print_snapshot(ctx, &snapshot);
    }
    Ok(())
}

fn print_snapshot(ctx: &AppContext, snapshot: &DashboardSnapshot) {
    let decimals = ctx.config.contracts.token_decimals;
    let symbol = &ctx.config.contracts.token_symbol;
    let token = |value: u128| format!("{} {}", format_units(value, decimals), symbol);
    let native = format_units(
        snapshot.balances.native,
        u32::from(ctx.config.chain.currency_decimals),
    );

    println!("\n=== DASHBOARD ({}) ===\n", snapshot.account.short());
    println!("Balance: {} {}", native, ctx.config.chain.currency_symbol);
    println!("Wallet: {}", token(snapshot.balances.token));
    if snapshot.balances.allowance == u128::MAX {
        println!("Allowance: unlimited");
    } else {
        println!("Allowance: {}", token(snapshot.balances.allowance));
    }
    println!("Staked: {}", token(snapshot.position.staked));
    println!("Earned: {}", token(snapshot.position.earned));
    if let Some(since) = snapshot.position.staked_since {
        println!("Staked since: {}", since.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("\nTotal staked: {}", token(snapshot.stats.total_staked));
    println!("Total supply: {}", token(snapshot.stats.total_supply));
    println!("Reward rate: {}", snapshot.stats.reward_rate);

    if !snapshot.failed_reads.is_empty() {
        println!("\nUnavailable (shown as 0): {}", snapshot.failed_reads.join(", "));
    }
}
