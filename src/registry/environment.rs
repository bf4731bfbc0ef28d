//! Host environment: injected wallet objects, user agent and the
//! EIP-6963 announce/request event pair

use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::provider::ProviderHandle;

static MOBILE_UA: OnceLock<Regex> = OnceLock::new();
static IOS_UA: OnceLock<Regex> = OnceLock::new();

fn mobile_ua() -> &'static Regex {
    MOBILE_UA.get_or_init(|| {
        Regex::new(r"(?i)(android|iphone|ipad|ipod|mobile|blackberry|iemobile|opera mini)")
            .expect("Invalid mobile user agent regex")
    })
}

fn ios_ua() -> &'static Regex {
    IOS_UA.get_or_init(|| Regex::new(r"(?i)(iphone|ipad|ipod)").expect("Invalid iOS user agent regex"))
}

/// Platform family derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Desktop,
    Ios,
    Android,
    /// Mobile, but neither iOS nor Android
    OtherMobile,
}

impl Platform {
    pub fn from_user_agent(user_agent: &str) -> Self {
        if ios_ua().is_match(user_agent) {
            Platform::Ios
        } else if user_agent.to_ascii_lowercase().contains("android") {
            Platform::Android
        } else if mobile_ua().is_match(user_agent) {
            Platform::OtherMobile
        } else {
            Platform::Desktop
        }
    }

    pub fn is_mobile(&self) -> bool {
        !matches!(self, Platform::Desktop)
    }
}

/// EIP-6963 provider metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub rdns: String,
}

/// Where an injected provider was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionSource {
    /// Announced through `eip6963:announceProvider`
    Announced(ProviderInfo),
    /// A wallet-specific global (e.g. `okxwallet`)
    Namespace(String),
    /// The shared `ethereum` global
    Global,
    /// Entry of the `ethereum.providers` array
    ProviderArray(usize),
}

/// A provider object present in the environment
#[derive(Clone)]
pub struct InjectedProvider {
    pub source: InjectionSource,
    /// Brand markers set on the object (`isMetaMask`, `isCoinbaseWallet`, ...)
    pub flags: BTreeSet<String>,
    pub handle: ProviderHandle,
}

impl InjectedProvider {
    pub fn new(source: InjectionSource, handle: ProviderHandle) -> Self {
        Self {
            source,
            flags: BTreeSet::new(),
            handle,
        }
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

impl std::fmt::Debug for InjectedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectedProvider")
            .field("source", &self.source)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Payload of an `eip6963:announceProvider` event
#[derive(Clone)]
pub struct ProviderAnnouncement {
    pub info: ProviderInfo,
    pub provider: ProviderHandle,
}

/// The page context wallets inject into
pub trait Environment: Send + Sync {
    /// Provider objects currently present
    fn injected(&self) -> Vec<InjectedProvider>;

    fn user_agent(&self) -> String;

    /// URL of the running dapp, embedded into deep links
    fn dapp_url(&self) -> String;

    /// Listen for late provider announcements
    fn announcements(&self) -> broadcast::Receiver<ProviderAnnouncement>;

    /// Dispatch `eip6963:requestProvider`
    fn request_providers(&self);
}

/// Environment assembled explicitly; providers may be added at any time to
/// model late injection
pub struct StaticEnvironment {
    user_agent: String,
    dapp_url: String,
    injected: Mutex<Vec<InjectedProvider>>,
    announcements: broadcast::Sender<ProviderAnnouncement>,
}

impl StaticEnvironment {
    pub fn new(user_agent: impl Into<String>, dapp_url: impl Into<String>) -> Self {
        let (announcements, _) = broadcast::channel(32);
        Self {
            user_agent: user_agent.into(),
            dapp_url: dapp_url.into(),
            injected: Mutex::new(Vec::new()),
            announcements,
        }
    }

    /// Add a provider found at a legacy injection point
    pub fn inject(&self, provider: InjectedProvider) {
        self.lock().push(provider);
    }

    /// Add a provider through the announce event
    pub fn announce(&self, info: ProviderInfo, handle: ProviderHandle) {
        debug!("Provider announced: {} ({})", info.name, info.rdns);
        self.lock().push(InjectedProvider::new(
            InjectionSource::Announced(info.clone()),
            handle.clone(),
        ));
        let _ = self.announcements.send(ProviderAnnouncement {
            info,
            provider: handle,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<InjectedProvider>> {
        self.injected.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Environment for StaticEnvironment {
    fn injected(&self) -> Vec<InjectedProvider> {
        self.lock().clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn dapp_url(&self) -> String {
        self.dapp_url.clone()
    }

    fn announcements(&self) -> broadcast::Receiver<ProviderAnnouncement> {
        self.announcements.subscribe()
    }

    fn request_providers(&self) {
        // Wallets answer a request by announcing again
        let announced: Vec<ProviderAnnouncement> = self
            .lock()
            .iter()
            .filter_map(|p| match &p.source {
                InjectionSource::Announced(info) => Some(ProviderAnnouncement {
                    info: info.clone(),
                    provider: p.handle.clone(),
                }),
                _ => None,
            })
            .collect();

        for announcement in announced {
            let _ = self.announcements.send(announcement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";
        let android = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 Mobile Safari/537.36";
        let desktop = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/126.0 Safari/537.36";

        assert_eq!(Platform::from_user_agent(iphone), Platform::Ios);
        assert_eq!(Platform::from_user_agent(android), Platform::Android);
        assert_eq!(Platform::from_user_agent(desktop), Platform::Desktop);
        assert!(Platform::from_user_agent("Opera Mini/8.0").is_mobile());
    }
}
