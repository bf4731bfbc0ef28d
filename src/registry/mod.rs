//! Wallet provider registry
//!
//! Produces the wallets available right now. Scanning is a pure function
//! of the environment and safe to repeat. Extensions may inject late, so
//! [`WalletRegistry::watch`] rescans on every EIP-6963 announcement.
//!
//! # Availability
//!
//! - injected wallets are claimed through the detection table in
//!   [`catalog`], one wallet per provider object
//! - on mobile every catalogued wallet with a link template is offered as a
//!   deep link; wallets without one (Rabby, Brave) are listed only when
//!   their provider is injected, i.e. inside their own in-app browser
//! - the relay connection method is always offered

pub mod catalog;
pub mod deeplink;
pub mod environment;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::provider::{handle_id, ProviderHandle};

pub use catalog::{Evidence, KnownWallet, DEFAULT_WALLET_ID, KNOWN_WALLETS, WALLETCONNECT_ID};
pub use deeplink::{DeepLink, DeepLinkLauncher, DeepLinkTemplate, LaunchStrategy, LoggingLauncher};
pub use environment::{
    Environment, InjectedProvider, InjectionSource, Platform, ProviderAnnouncement, ProviderInfo,
    StaticEnvironment,
};

/// What a wallet can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub is_extension: bool,
    pub supports_deep_link: bool,
}

/// How a wallet can be reached right now
#[derive(Clone)]
pub enum Availability {
    /// Provider object present in the page
    Injected(ProviderHandle),
    /// Launch the wallet app and wait for it to inject
    DeepLink(DeepLink),
    /// Session relay, no local injection needed
    Relay,
}

/// An available wallet. Immutable once produced by a scan.
#[derive(Clone)]
pub struct WalletDescriptor {
    pub id: String,
    pub display_name: String,
    pub capabilities: Capabilities,
    pub availability: Availability,
    /// Set for injected wallets
    pub evidence: Option<Evidence>,
}

impl WalletDescriptor {
    /// Whether the wallet's provider is present in the page
    pub fn is_detected(&self) -> bool {
        matches!(self.availability, Availability::Injected(_))
    }

    pub fn provider(&self) -> Option<ProviderHandle> {
        match &self.availability {
            Availability::Injected(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn deep_link(&self) -> Option<&DeepLink> {
        match &self.availability {
            Availability::DeepLink(link) => Some(link),
            _ => None,
        }
    }

    pub fn is_relay(&self) -> bool {
        matches!(self.availability, Availability::Relay)
    }

    fn relay() -> Self {
        Self {
            id: WALLETCONNECT_ID.to_string(),
            display_name: "WalletConnect".to_string(),
            capabilities: Capabilities {
                is_extension: false,
                supports_deep_link: false,
            },
            availability: Availability::Relay,
            evidence: None,
        }
    }
}

impl std::fmt::Debug for WalletDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let availability = match &self.availability {
            Availability::Injected(_) => "injected".to_string(),
            Availability::DeepLink(link) => format!("deep link {}", link.url),
            Availability::Relay => "relay".to_string(),
        };
        f.debug_struct("WalletDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("availability", &availability)
            .field("evidence", &self.evidence)
            .finish()
    }
}

/// A claim of one provider object by one wallet
struct Claim {
    /// Evidence, table position, injection order; lower is stronger
    rank: (Evidence, usize, usize),
    descriptor: WalletDescriptor,
}

fn claim(provider: &InjectedProvider, order: usize) -> Option<Claim> {
    if let Some((index, rule)) = catalog::classify(provider) {
        let wallet = rule.wallet;
        return Some(Claim {
            rank: (rule.evidence, index, order),
            descriptor: WalletDescriptor {
                id: wallet.id.to_string(),
                display_name: wallet.display_name.to_string(),
                capabilities: Capabilities {
                    is_extension: wallet.is_extension,
                    supports_deep_link: wallet.deep_link.is_some(),
                },
                availability: Availability::Injected(provider.handle.clone()),
                evidence: Some(rule.evidence),
            },
        });
    }

    // Announced wallets outside the catalogue are still usable
    match &provider.source {
        InjectionSource::Announced(info) => Some(Claim {
            rank: (Evidence::Announced, usize::MAX, order),
            descriptor: WalletDescriptor {
                id: info.rdns.clone(),
                display_name: info.name.clone(),
                capabilities: Capabilities {
                    is_extension: true,
                    supports_deep_link: false,
                },
                availability: Availability::Injected(provider.handle.clone()),
                evidence: Some(Evidence::Announced),
            },
        }),
        _ => None,
    }
}

/// Stateless scanner over an [`Environment`]
pub struct WalletRegistry;

impl WalletRegistry {
    /// Wallets whose provider is injected in the page
    ///
    /// Each provider object is claimed by at most one wallet, and each
    /// wallet by at most one object; conflicts go to the strongest evidence.
    pub fn detect(env: &dyn Environment) -> Vec<WalletDescriptor> {
        // Same object reachable through several injection points
        let mut by_object: HashMap<usize, Claim> = HashMap::new();
        for (order, provider) in env.injected().into_iter().enumerate() {
            let Some(candidate) = claim(&provider, order) else {
                debug!("Unclaimed provider object at {:?}", provider.source);
                continue;
            };
            let key = handle_id(&provider.handle);
            match by_object.get(&key) {
                Some(existing) if existing.rank <= candidate.rank => {}
                _ => {
                    by_object.insert(key, candidate);
                }
            }
        }

        // Several objects claiming the same wallet
        let mut by_wallet: HashMap<String, Claim> = HashMap::new();
        for candidate in by_object.into_values() {
            match by_wallet.get(&candidate.descriptor.id) {
                Some(existing) if existing.rank <= candidate.rank => {
                    debug!(
                        "Ignoring weaker claim for {} ({:?})",
                        candidate.descriptor.id, candidate.rank.0
                    );
                }
                _ => {
                    by_wallet.insert(candidate.descriptor.id.clone(), candidate);
                }
            }
        }

        let mut detected: Vec<WalletDescriptor> =
            by_wallet.into_values().map(|c| c.descriptor).collect();
        detected.sort_by(|a, b| {
            catalog::catalogue_index(&a.id)
                .cmp(&catalog::catalogue_index(&b.id))
                .then_with(|| a.id.cmp(&b.id))
        });
        detected
    }

    /// All wallets available right now
    pub fn scan(env: &dyn Environment) -> Vec<WalletDescriptor> {
        let mut descriptors = Self::detect(env);
        let platform = Platform::from_user_agent(&env.user_agent());

        if platform.is_mobile() {
            let dapp_url = env.dapp_url();
            for wallet in KNOWN_WALLETS {
                if descriptors.iter().any(|d| d.id == wallet.id) {
                    continue;
                }
                let Some(template) = wallet.deep_link else {
                    continue;
                };
                match DeepLink::build(wallet.id, template, &dapp_url, platform) {
                    Ok(link) => descriptors.push(WalletDescriptor {
                        id: wallet.id.to_string(),
                        display_name: wallet.display_name.to_string(),
                        capabilities: Capabilities {
                            is_extension: false,
                            supports_deep_link: true,
                        },
                        availability: Availability::DeepLink(link),
                        evidence: None,
                    }),
                    Err(e) => warn!("No deep link for {}: {}", wallet.id, e),
                }
            }
        }

        descriptors.push(WalletDescriptor::relay());
        descriptors
    }

    /// Scan now and rescan whenever a provider announces itself
    pub fn watch(env: Arc<dyn Environment>) -> RegistryWatch {
        let mut announcements = env.announcements();
        env.request_providers();
        let initial = Self::scan(env.as_ref());

        let (tx, updates) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            loop {
                match announcements.recv().await {
                    Ok(announcement) => {
                        debug!("Rescanning after announcement from {}", announcement.info.rdns);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Missed {} announcements, rescanning", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if tx.send(Self::scan(env.as_ref())).await.is_err() {
                    break;
                }
            }
        });

        RegistryWatch {
            initial,
            updates,
            task,
        }
    }
}

/// Live view of the registry; the background listener stops when dropped
pub struct RegistryWatch {
    pub initial: Vec<WalletDescriptor>,
    pub updates: mpsc::Receiver<Vec<WalletDescriptor>>,
    task: JoinHandle<()>,
}

impl Drop for RegistryWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
