//! VelaCore wallet library
//!
//! Wallet discovery, connection negotiation and session management for the
//! VelaCore staking dApp, plus the contract facades driven by a connection.

pub mod activity;
pub mod cli;
pub mod config;
pub mod error;
pub mod facade;
pub mod negotiator;
pub mod notify;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use activity::{ActivityLog, LogCategory, LogEntry, LogStatus};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use negotiator::{ConnectionNegotiator, Phase};
pub use provider::{Provider, ProviderExt, ProviderHandle};
pub use registry::{WalletDescriptor, WalletRegistry};
pub use session::{ConnectionState, Session, SessionStore};
pub use types::{Address, ChainId, TxHash};
