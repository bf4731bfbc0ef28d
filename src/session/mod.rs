//! Connection session
//!
//! [`Session`] owns the single [`ConnectionState`] and is passed explicitly
//! to every component that reads it. Only the negotiator and disconnect
//! write to it.
//!
//! [`SessionStore`] persists the last connected wallet id as a hint for
//! reconnecting on the next start.

pub mod state;
pub mod store;

pub use state::{ActiveConnection, AttemptToken, ConnectionState, Session};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, LAST_WALLET_KEY};
