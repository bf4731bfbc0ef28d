//! Mobile deep links
//!
//! On mobile the page cannot tell whether a wallet app is installed, so
//! every wallet with a link template is offered. Selecting one opens the
//! wallet's in-app browser on the current dapp URL.

use url::Url;
use tracing::info;

use super::environment::Platform;
use crate::error::{Error, Result};

/// How a wallet builds its universal link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLinkTemplate {
    /// `{base}{host}{path}`: the dapp URL without its scheme appended to a
    /// path prefix
    DappPath(&'static str),
    /// `{base}` with the full dapp URL as an encoded query parameter
    Query {
        base: &'static str,
        param: &'static str,
    },
}

/// How the link is opened from the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Load the link in an invisible iframe (Android)
    HiddenIframe,
    /// Navigate the page to the link (iOS and others)
    Navigate,
}

impl LaunchStrategy {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Android => LaunchStrategy::HiddenIframe,
            _ => LaunchStrategy::Navigate,
        }
    }
}

/// A ready-to-launch wallet link
#[derive(Debug, Clone, PartialEq)]
pub struct DeepLink {
    pub wallet_id: String,
    pub url: Url,
    pub strategy: LaunchStrategy,
}

impl DeepLink {
    pub fn build(
        wallet_id: &str,
        template: DeepLinkTemplate,
        dapp_url: &str,
        platform: Platform,
    ) -> Result<Self> {
        let dapp = Url::parse(dapp_url)
            .map_err(|e| Error::Config(format!("Invalid dapp URL {}: {}", dapp_url, e)))?;

        let url = match template {
            DeepLinkTemplate::DappPath(base) => {
                let without_scheme = dapp
                    .as_str()
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(dapp.as_str());
                Url::parse(&format!("{}{}", base, without_scheme))
            }
            DeepLinkTemplate::Query { base, param } => Url::parse(base).map(|mut url| {
                url.query_pairs_mut().append_pair(param, dapp.as_str());
                url
            }),
        }
        .map_err(|e| Error::Internal(format!("Invalid deep link for {}: {}", wallet_id, e)))?;

        Ok(Self {
            wallet_id: wallet_id.to_string(),
            url,
            strategy: LaunchStrategy::for_platform(platform),
        })
    }
}

/// Opens deep links on the device
pub trait DeepLinkLauncher: Send + Sync {
    fn launch(&self, link: &DeepLink) -> Result<()>;
}

/// Launcher for hosts without a browser: surfaces the link in the log so
/// it can be opened on the phone manually
#[derive(Debug, Default)]
pub struct LoggingLauncher;

impl DeepLinkLauncher for LoggingLauncher {
    fn launch(&self, link: &DeepLink) -> Result<()> {
        info!(
            "Open in {} ({:?}): {}",
            link.wallet_id, link.strategy, link.url
        );
        Ok(())
    }
}
