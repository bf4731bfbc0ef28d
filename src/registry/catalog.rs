//! Known wallets and the detection table
//!
//! Detection is an ordered list of `(predicate, wallet)` rules evaluated in
//! priority order; the first rule matching an injected object claims it.
//! Priority, strongest first:
//!
//! 1. EIP-6963 announcement with a known reverse-DNS id
//! 2. wallet-specific global namespace
//! 3. brand flag on the shared `ethereum` global
//! 4. brand flag on an entry of `ethereum.providers`
//! 5. unbranded `ethereum` global, assumed to be MetaMask
//!
//! Within one tier, wallets are tried in catalogue order. Wallets that also
//! set `isMetaMask` for compatibility (Rabby, Brave, ...) come before
//! MetaMask so their own flag wins.

use std::sync::OnceLock;

use super::deeplink::DeepLinkTemplate;
use super::environment::{InjectedProvider, InjectionSource};

/// Id of the relay-based connection method
pub const WALLETCONNECT_ID: &str = "walletconnect";

/// Wallet assumed to own an unbranded `ethereum` global
pub const DEFAULT_WALLET_ID: &str = "metamask";

/// Static description of a supported wallet
#[derive(Debug)]
pub struct KnownWallet {
    pub id: &'static str,
    pub display_name: &'static str,
    pub rdns: &'static [&'static str],
    pub brand_flags: &'static [&'static str],
    pub namespace: Option<&'static str>,
    pub deep_link: Option<DeepLinkTemplate>,
    pub is_extension: bool,
}

pub static KNOWN_WALLETS: &[KnownWallet] = &[
    KnownWallet {
        id: "rabby",
        display_name: "Rabby Wallet",
        rdns: &["io.rabby"],
        brand_flags: &["isRabby"],
        namespace: None,
        deep_link: None,
        is_extension: true,
    },
    KnownWallet {
        id: "brave",
        display_name: "Brave Wallet",
        rdns: &["com.brave.wallet"],
        brand_flags: &["isBraveWallet"],
        namespace: None,
        deep_link: None,
        is_extension: false,
    },
    KnownWallet {
        id: "okx",
        display_name: "OKX Wallet",
        rdns: &["com.okex.wallet"],
        brand_flags: &["isOkxWallet", "isOKExWallet"],
        namespace: Some("okxwallet"),
        deep_link: Some(DeepLinkTemplate::Query {
            base: "okx://wallet/dapp/url",
            param: "dappUrl",
        }),
        is_extension: true,
    },
    KnownWallet {
        id: "trust",
        display_name: "Trust Wallet",
        rdns: &["com.trustwallet.app"],
        brand_flags: &["isTrust", "isTrustWallet"],
        namespace: Some("trustwallet"),
        deep_link: Some(DeepLinkTemplate::Query {
            base: "https://link.trustwallet.com/open_url?coin_id=60",
            param: "url",
        }),
        is_extension: true,
    },
    KnownWallet {
        id: "coinbase",
        display_name: "Coinbase Wallet",
        rdns: &["com.coinbase.wallet"],
        brand_flags: &["isCoinbaseWallet"],
        namespace: Some("coinbaseWalletExtension"),
        deep_link: Some(DeepLinkTemplate::Query {
            base: "https://go.cb-w.com/dapp",
            param: "cb_url",
        }),
        is_extension: true,
    },
    KnownWallet {
        id: "metamask",
        display_name: "MetaMask",
        rdns: &["io.metamask", "io.metamask.flask"],
        brand_flags: &["isMetaMask"],
        namespace: None,
        deep_link: Some(DeepLinkTemplate::DappPath("https://metamask.app.link/dapp/")),
        is_extension: true,
    },
];

pub fn find(id: &str) -> Option<&'static KnownWallet> {
    KNOWN_WALLETS.iter().find(|w| w.id == id)
}

/// Position in the catalogue, used for stable ordering
pub fn catalogue_index(id: &str) -> usize {
    KNOWN_WALLETS
        .iter()
        .position(|w| w.id == id)
        .unwrap_or(KNOWN_WALLETS.len())
}

/// Strength of the evidence that an object belongs to a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Evidence {
    Announced,
    Namespace,
    BrandFlag,
    ProviderArray,
    DefaultFallback,
}

/// One entry of the detection table
pub struct DetectionRule {
    pub wallet: &'static KnownWallet,
    pub evidence: Evidence,
    predicate: fn(&KnownWallet, &InjectedProvider) -> bool,
}

impl DetectionRule {
    pub fn matches(&self, provider: &InjectedProvider) -> bool {
        (self.predicate)(self.wallet, provider)
    }
}

fn announced_rdns(wallet: &KnownWallet, provider: &InjectedProvider) -> bool {
    matches!(&provider.source, InjectionSource::Announced(info) if wallet.rdns.contains(&info.rdns.as_str()))
}

fn own_namespace(wallet: &KnownWallet, provider: &InjectedProvider) -> bool {
    matches!(&provider.source, InjectionSource::Namespace(ns) if wallet.namespace == Some(ns.as_str()))
}

fn has_brand_flag(wallet: &KnownWallet, provider: &InjectedProvider) -> bool {
    wallet.brand_flags.iter().any(|flag| provider.has_flag(flag))
}

fn flagged_global(wallet: &KnownWallet, provider: &InjectedProvider) -> bool {
    provider.source == InjectionSource::Global && has_brand_flag(wallet, provider)
}

fn flagged_array_entry(wallet: &KnownWallet, provider: &InjectedProvider) -> bool {
    matches!(provider.source, InjectionSource::ProviderArray(_)) && has_brand_flag(wallet, provider)
}

fn any_global(_: &KnownWallet, provider: &InjectedProvider) -> bool {
    provider.source == InjectionSource::Global
}

static TABLE: OnceLock<Vec<DetectionRule>> = OnceLock::new();

/// The detection table, in priority order
pub fn detection_table() -> &'static [DetectionRule] {
    TABLE.get_or_init(|| {
        let tiers: [(Evidence, fn(&KnownWallet, &InjectedProvider) -> bool); 4] = [
            (Evidence::Announced, announced_rdns),
            (Evidence::Namespace, own_namespace),
            (Evidence::BrandFlag, flagged_global),
            (Evidence::ProviderArray, flagged_array_entry),
        ];

        let mut rules: Vec<DetectionRule> = tiers
            .iter()
            .flat_map(|(evidence, predicate)| {
                KNOWN_WALLETS.iter().map(move |wallet| DetectionRule {
                    wallet,
                    evidence: *evidence,
                    predicate: *predicate,
                })
            })
            .collect();

        if let Some(default_wallet) = find(DEFAULT_WALLET_ID) {
            rules.push(DetectionRule {
                wallet: default_wallet,
                evidence: Evidence::DefaultFallback,
                predicate: any_global,
            });
        }

        rules
    })
}

/// First matching rule for `provider`, with its position in the table
pub fn classify(provider: &InjectedProvider) -> Option<(usize, &'static DetectionRule)> {
    detection_table()
        .iter()
        .enumerate()
        .find(|(_, rule)| rule.matches(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::scripted::ScriptedProvider;
    use crate::registry::environment::ProviderInfo;

    fn injected(source: InjectionSource, flags: &[&str]) -> InjectedProvider {
        flags.iter().fold(
            InjectedProvider::new(source, ScriptedProvider::wallet(vec![], 1)),
            |p, flag| p.with_flag(flag),
        )
    }

    #[test]
    fn test_table_is_ordered_by_evidence() {
        let table = detection_table();
        assert!(table.windows(2).all(|w| w[0].evidence <= w[1].evidence));
        assert_eq!(table.last().unwrap().evidence, Evidence::DefaultFallback);
    }

    #[test]
    fn test_specific_flag_beats_metamask_compat_flag() {
        let brave = injected(InjectionSource::Global, &["isMetaMask", "isBraveWallet"]);
        let (_, rule) = classify(&brave).unwrap();
        assert_eq!(rule.wallet.id, "brave");
        assert_eq!(rule.evidence, Evidence::BrandFlag);
    }

    #[test]
    fn test_unbranded_global_defaults_to_metamask() {
        let plain = injected(InjectionSource::Global, &[]);
        let (_, rule) = classify(&plain).unwrap();
        assert_eq!(rule.wallet.id, DEFAULT_WALLET_ID);
        assert_eq!(rule.evidence, Evidence::DefaultFallback);
    }

    #[test]
    fn test_array_entry_without_flags_is_unclaimed() {
        let entry = injected(InjectionSource::ProviderArray(2), &[]);
        assert!(classify(&entry).is_none());
    }

    #[test]
    fn test_announcement_uses_rdns() {
        let info = ProviderInfo {
            uuid: "6f0e2b7a".to_string(),
            name: "Coinbase Wallet".to_string(),
            icon: String::new(),
            rdns: "com.coinbase.wallet".to_string(),
        };
        let announced = injected(InjectionSource::Announced(info), &["isMetaMask"]);
        let (_, rule) = classify(&announced).unwrap();
        assert_eq!(rule.wallet.id, "coinbase");
        assert_eq!(rule.evidence, Evidence::Announced);
    }
}
