//! Error types for wallet connection and contract interaction

use serde::Serialize;
use thiserror::Error;

use crate::provider::{codes, ProviderRpcError};

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing classification of wallet and contract failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    UserRejected,
    Timeout,
    NoAccountsReturned,
    UnsupportedChain,
    ProviderNotFound,
    TransactionReverted,
    SyncFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::UserRejected => "UserRejected",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::NoAccountsReturned => "NoAccountsReturned",
            ErrorKind::UnsupportedChain => "UnsupportedChain",
            ErrorKind::ProviderNotFound => "ProviderNotFound",
            ErrorKind::TransactionReverted => "TransactionReverted",
            ErrorKind::SyncFailure => "SyncFailure",
        };
        f.write_str(name)
    }
}

/// Main error type for the wallet layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Connection errors
    #[error("Request rejected by user: {0}")]
    UserRejected(String),

    #[error("Wallet did not respond within {0}ms")]
    Timeout(u64),

    #[error("Mobile wallet did not connect within {0}ms")]
    MobileTimeout(u64),

    #[error("Wallet returned no accounts")]
    NoAccountsReturned,

    #[error("Chain not supported by wallet: {0}")]
    UnsupportedChain(String),

    #[error("Wallet provider not found: {0}")]
    ProviderNotFound(String),

    #[error("No wallet connected")]
    NotConnected,

    #[error("Connection attempt superseded by a newer attempt")]
    Superseded,

    // Provider RPC errors
    #[error("Provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    // Transaction errors
    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Transaction {0} not confirmed in time")]
    ConfirmationTimeout(String),

    // Synchronization errors
    #[error("Synchronization failed after {attempts} attempts: {reason}")]
    SyncFailure { attempts: u32, reason: String },

    // Value errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid transaction hash: {0}")]
    InvalidTxHash(String),

    // Storage and configuration
    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map to the user-facing taxonomy. Errors that do not originate from a
    /// wallet or contract interaction have no kind.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::UserRejected(_) => Some(ErrorKind::UserRejected),
            Error::Timeout(_) | Error::MobileTimeout(_) | Error::ConfirmationTimeout(_) => {
                Some(ErrorKind::Timeout)
            }
            Error::NoAccountsReturned => Some(ErrorKind::NoAccountsReturned),
            Error::UnsupportedChain(_) => Some(ErrorKind::UnsupportedChain),
            Error::ProviderNotFound(_) | Error::NotConnected => Some(ErrorKind::ProviderNotFound),
            Error::TransactionReverted(_) => Some(ErrorKind::TransactionReverted),
            Error::Provider { .. } | Error::InvalidResponse(_) | Error::SyncFailure { .. } => {
                Some(ErrorKind::SyncFailure)
            }
            _ => None,
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { code, .. } => matches!(
                *code,
                codes::INTERNAL_ERROR | codes::LIMIT_EXCEEDED | codes::RESOURCE_UNAVAILABLE
            ),
            Error::InvalidResponse(_) | Error::SyncFailure { .. } => true,
            _ => false,
        }
    }
}

impl From<ProviderRpcError> for Error {
    fn from(e: ProviderRpcError) -> Self {
        match e.effective_code() {
            codes::USER_REJECTED | codes::UNAUTHORIZED => Error::UserRejected(e.message),
            codes::UNRECOGNIZED_CHAIN => Error::UnsupportedChain(e.message),
            codes::DISCONNECTED | codes::CHAIN_DISCONNECTED => Error::ProviderNotFound(e.message),
            code => Error::Provider {
                code,
                message: e.message,
            },
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejection_codes_map_to_user_rejected() {
        let err: Error = ProviderRpcError::new(codes::USER_REJECTED, "User denied").into();
        assert_eq!(err, Error::UserRejected("User denied".to_string()));
        assert_eq!(err.kind(), Some(ErrorKind::UserRejected));

        let err: Error = ProviderRpcError::new(codes::UNAUTHORIZED, "not authorized").into();
        assert_eq!(err.kind(), Some(ErrorKind::UserRejected));
    }

    #[test]
    fn test_nested_unrecognized_chain_code() {
        // Mobile wallets wrap 4902 inside an internal error
        let rpc = ProviderRpcError {
            code: codes::INTERNAL_ERROR,
            message: "Unrecognized chain ID".to_string(),
            data: Some(json!({ "originalError": { "code": 4902 } })),
        };
        let err: Error = rpc.into();
        assert!(matches!(err, Error::UnsupportedChain(_)));
    }

    #[test]
    fn test_generic_provider_error_is_retryable() {
        let err: Error = ProviderRpcError::new(codes::INTERNAL_ERROR, "upstream").into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), Some(ErrorKind::SyncFailure));

        let err: Error = ProviderRpcError::new(codes::USER_REJECTED, "no").into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_non_wallet_errors_have_no_kind() {
        assert_eq!(Error::Config("bad".to_string()).kind(), None);
        assert_eq!(Error::Superseded.kind(), None);
        assert_eq!(
            Error::MobileTimeout(30_000).kind(),
            Some(ErrorKind::Timeout)
        );
    }
}
