//! Session relay connection method
//!
//! The relay needs no local injection: a session is created, the pairing
//! URI is shown to the user (QR code or link), and the approval arrives
//! from the external wallet with the granted accounts and a provider handle
//! bound to the session.

use async_trait::async_trait;

use crate::error::Result;
use crate::provider::ProviderHandle;
use crate::types::Address;

/// A pending relay session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPairing {
    pub topic: String,
    /// URI the external wallet scans or opens
    pub uri: String,
}

/// Approval delivered by the relay's `connect` event
#[derive(Clone)]
pub struct RelayApproval {
    pub accounts: Vec<Address>,
    pub provider: ProviderHandle,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn create_session(&self) -> Result<RelayPairing>;

    /// Resolves once the user approves (or rejects) in the external wallet
    async fn await_approval(&self, pairing: &RelayPairing) -> Result<RelayApproval>;
}
