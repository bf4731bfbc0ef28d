//! Contract facades
//!
//! [`DataRefresh`] reads balances, the stake position and protocol stats
//! for a connected account. [`MutationFacade`] submits user actions and
//! follows them to confirmation. Both talk to the chain only through the
//! connected wallet's provider.

pub mod abi;
pub mod mutation;
pub mod refresh;

pub use mutation::{Action, MutationConfig, MutationFacade, TxOutcome};
pub use refresh::{
    Balances, DashboardSnapshot, DataRefresh, ProtocolStats, RefreshConfig, StakePosition, SyncStatus,
};

use crate::types::Address;

/// The two contracts the application talks to
#[derive(Debug, Clone, PartialEq)]
pub struct Contracts {
    /// ERC-20 staking token (with a test faucet)
    pub token: Address,
    pub staking: Address,
    pub token_symbol: String,
    pub token_decimals: u32,
}

/// Function signatures used by the facades
pub mod signatures {
    pub const BALANCE_OF: &str = "balanceOf(address)";
    pub const ALLOWANCE: &str = "allowance(address,address)";
    pub const TOTAL_SUPPLY: &str = "totalSupply()";
    pub const APPROVE: &str = "approve(address,uint256)";
    pub const FAUCET: &str = "faucet()";

    pub const STAKED_BALANCE: &str = "stakedBalance(address)";
    pub const EARNED: &str = "earned(address)";
    pub const STAKE_TIMESTAMP: &str = "stakeTimestamp(address)";
    pub const TOTAL_STAKED: &str = "totalStaked()";
    pub const REWARD_RATE: &str = "rewardRate()";
    pub const STAKE: &str = "stake(uint256)";
    pub const WITHDRAW: &str = "withdraw(uint256)";
    pub const CLAIM_REWARDS: &str = "claimRewards()";
    pub const EMERGENCY_WITHDRAW: &str = "emergencyWithdraw()";
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    use super::abi::{encode_call, selector, Word};
    use super::signatures;
    use super::Contracts;
    use crate::types::Address;

    pub fn contracts() -> Contracts {
        Contracts {
            token: "0x1000000000000000000000000000000000000001".parse().unwrap(),
            staking: "0x2000000000000000000000000000000000000002".parse().unwrap(),
            token_symbol: "VELA".to_string(),
            token_decimals: 18,
        }
    }

    pub fn word(value: u128) -> Value {
        json!(format!("0x{:064x}", value))
    }

    /// Function signature targeted by an `eth_call`, if known
    pub fn called(params: &Value) -> Option<&'static str> {
        let data = params[0]["data"].as_str()?;
        let all = [
            signatures::BALANCE_OF,
            signatures::ALLOWANCE,
            signatures::TOTAL_SUPPLY,
            signatures::STAKED_BALANCE,
            signatures::EARNED,
            signatures::STAKE_TIMESTAMP,
            signatures::TOTAL_STAKED,
            signatures::REWARD_RATE,
        ];
        all.into_iter()
            .find(|sig| data.starts_with(&format!("0x{}", hex::encode(selector(sig)))))
    }

    /// Reasonable answers for every read the dashboard performs
    pub fn chain_state(method: &str, params: &Value) -> Value {
        match method {
            "eth_getBalance" => json!("0xde0b6b3a7640000"),
            "eth_call" => match called(params) {
                Some(signatures::BALANCE_OF) => word(500),
                Some(signatures::ALLOWANCE) => word(100),
                Some(signatures::TOTAL_SUPPLY) => word(1_000_000),
                Some(signatures::STAKED_BALANCE) => word(250),
                Some(signatures::EARNED) => word(7),
                Some(signatures::STAKE_TIMESTAMP) => word(1_700_000_000),
                Some(signatures::TOTAL_STAKED) => word(90_000),
                Some(signatures::REWARD_RATE) => word(3),
                _ => word(0),
            },
            _ => Value::Null,
        }
    }

    #[test]
    fn test_called_recognizes_encoded_reads() {
        let account = Address::ZERO;
        let params = json!([{ "data": encode_call(signatures::EARNED, &[Word::Address(account)]) }]);
        assert_eq!(called(&params), Some(signatures::EARNED));
    }
}
