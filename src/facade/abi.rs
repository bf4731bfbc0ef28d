//! Minimal Solidity call encoding
//!
//! Only static arguments (addresses and unsigned integers) are needed by the
//! token and staking contracts, so each argument is one 32-byte word.

use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};
use crate::types::Address;

/// One static ABI argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Word {
    Address(Address),
    Uint(u128),
}

impl Word {
    fn encode(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            Word::Address(address) => word[12..].copy_from_slice(address.as_bytes()),
            Word::Uint(value) => word[16..].copy_from_slice(&value.to_be_bytes()),
        }
        word
    }
}

/// First four bytes of the keccak-256 hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

/// `0x`-prefixed calldata for `signature(args...)`
pub fn encode_call(signature: &str, args: &[Word]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(&arg.encode());
    }
    format!("0x{}", hex::encode(data))
}

/// Decode the first returned word as an unsigned integer
///
/// Values above `u128::MAX` (an unlimited allowance, typically) saturate.
pub fn decode_uint(result: &str) -> Result<u128> {
    let bytes = hex::decode(result.trim_start_matches("0x"))
        .map_err(|e| Error::InvalidResponse(format!("Invalid call result {}: {}", result, e)))?;
    if bytes.len() < 32 {
        return Err(Error::InvalidResponse(format!(
            "Call returned {} bytes, expected a 32-byte word",
            bytes.len()
        )));
    }

    let word = &bytes[..32];
    if word[..16].iter().any(|b| *b != 0) {
        return Ok(u128::MAX);
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Parse a JSON-RPC hex quantity (`0x1bc16d674ec80000`)
///
/// Saturates above `u128::MAX`, like [`decode_uint`].
pub fn parse_quantity(quantity: &str) -> Result<u128> {
    let digits = quantity
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidResponse(format!("Quantity without 0x prefix: {}", quantity)))?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidResponse(format!("Invalid quantity {}", quantity)));
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Ok(u128::MAX);
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| Error::InvalidResponse(format!("Invalid quantity {}: {}", quantity, e)))
}
