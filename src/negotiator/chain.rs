//! Target chain check, switch and add-chain fallback

use tracing::{info, warn};

use super::Phase;
use crate::error::{Error, Result};
use crate::provider::{AddChainParams, NativeCurrency, Provider, ProviderExt};
use crate::types::ChainId;

/// The single chain this application targets
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSpec {
    pub chain_id: ChainId,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    pub explorer_url: Option<String>,
}

impl ChainSpec {
    /// Parameters for `wallet_addEthereumChain`
    pub fn add_params(&self) -> AddChainParams {
        AddChainParams {
            chain_id: self.chain_id.to_hex(),
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: self.explorer_url.iter().cloned().collect(),
        }
    }
}

/// Make sure the wallet is on `target`
///
/// A switch the wallet rejects as an unrecognized chain is retried exactly
/// once as an add-chain request; a successful add also selects the chain.
/// Any other failure is final.
pub async fn ensure_chain<P, F>(provider: &P, target: &ChainSpec, mut on_phase: F) -> Result<()>
where
    P: Provider + ?Sized,
    F: FnMut(Phase),
{
    on_phase(Phase::ChainCheck);
    let current = provider.chain_id().await?;
    if current == target.chain_id {
        return Ok(());
    }

    info!(
        "Wallet is on chain {}, switching to {} ({})",
        current, target.chain_id, target.name
    );
    on_phase(Phase::ChainSwitch);

    match provider.switch_chain(target.chain_id).await {
        Ok(()) => Ok(()),
        Err(Error::UnsupportedChain(reason)) => {
            warn!("Wallet does not know chain {} ({}), requesting add", target.chain_id, reason);
            provider.add_chain(&target.add_params()).await.map_err(|e| match e {
                // Still unknown after an add attempt
                Error::UnsupportedChain(msg) => Error::UnsupportedChain(msg),
                other => other,
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) fn test_chain() -> ChainSpec {
    ChainSpec {
        chain_id: ChainId(97),
        name: "BNB Smart Chain Testnet".to_string(),
        rpc_urls: vec!["https://data-seed-prebsc-1-s1.bnbchain.org:8545".to_string()],
        native_currency: NativeCurrency {
            name: "BNB".to_string(),
            symbol: "tBNB".to_string(),
            decimals: 18,
        },
        explorer_url: Some("https://testnet.bscscan.com".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::codes;
    use crate::provider::scripted::{Reply, ScriptedProvider};
    use crate::provider::ProviderRpcError;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_matching_chain_needs_no_switch() {
        let provider = ScriptedProvider::wallet(vec![], 97);
        let mut phases = Vec::new();
        ensure_chain(provider.as_ref(), &test_chain(), |p| phases.push(p))
            .await
            .unwrap();

        assert_eq!(phases, vec![Phase::ChainCheck]);
        assert_eq!(provider.calls("wallet_switchEthereumChain"), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_chain_falls_back_to_single_add() {
        let provider = ScriptedProvider::new(|method, _| match method {
            "eth_chainId" => Reply::Value(json!("0x1")),
            "wallet_switchEthereumChain" => Reply::Error(ProviderRpcError::new(
                codes::UNRECOGNIZED_CHAIN,
                "Unrecognized chain ID \"0x61\"",
            )),
            _ => Reply::Value(Value::Null),
        });

        ensure_chain(provider.as_ref(), &test_chain(), |_| {}).await.unwrap();

        assert_eq!(provider.calls("wallet_switchEthereumChain"), 1);
        assert_eq!(provider.calls("wallet_addEthereumChain"), 1);
        let params = provider.last_params("wallet_addEthereumChain").unwrap();
        assert_eq!(params[0]["chainId"], "0x61");
        assert_eq!(params[0]["nativeCurrency"]["symbol"], "tBNB");
        assert_eq!(params[0]["blockExplorerUrls"][0], "https://testnet.bscscan.com");
    }

    #[tokio::test]
    async fn test_failed_add_is_fatal() {
        let provider = ScriptedProvider::new(|method, _| match method {
            "eth_chainId" => Reply::Value(json!("0x1")),
            "wallet_switchEthereumChain" => {
                Reply::Error(ProviderRpcError::new(codes::UNRECOGNIZED_CHAIN, "unknown"))
            }
            "wallet_addEthereumChain" => {
                Reply::Error(ProviderRpcError::new(codes::USER_REJECTED, "User rejected"))
            }
            _ => Reply::Value(Value::Null),
        });

        let err = ensure_chain(provider.as_ref(), &test_chain(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)));
        assert_eq!(provider.calls("wallet_addEthereumChain"), 1);
    }

    #[tokio::test]
    async fn test_other_switch_errors_are_fatal() {
        let provider = ScriptedProvider::new(|method, _| match method {
            "eth_chainId" => Reply::Value(json!("0x1")),
            "wallet_switchEthereumChain" => {
                Reply::Error(ProviderRpcError::new(codes::USER_REJECTED, "User rejected"))
            }
            _ => Reply::Value(Value::Null),
        });

        let err = ensure_chain(provider.as_ref(), &test_chain(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)));
        assert_eq!(provider.calls("wallet_addEthereumChain"), 0);
    }
}
