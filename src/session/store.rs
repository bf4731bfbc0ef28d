//! Persistent session hint
//!
//! A single key holding the last connected wallet id. The value is only a
//! hint for silent reconnection and never proof of an active session.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Storage key for the last connected wallet id
pub const LAST_WALLET_KEY: &str = "velacore_last_wallet";

/// Durable key/value storage for the last connected wallet id
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, wallet_id: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Session hint stored in a JSON key/value file
///
/// Other keys in the file are preserved.
pub struct FileSessionStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within the process
    guard: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", self.path.display(), e)))?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                // A corrupt hint file must not block startup
                warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", self.path.display(), e)))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<String>> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_map()?.remove(LAST_WALLET_KEY))
    }

    fn save(&self, wallet_id: &str) -> Result<()> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map()?;
        map.insert(LAST_WALLET_KEY.to_string(), wallet_id.to_string());
        self.write_map(&map)?;
        debug!("Saved session hint: {}", wallet_id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map()?;
        if map.remove(LAST_WALLET_KEY).is_some() {
            self.write_map(&map)?;
            debug!("Cleared session hint");
        }
        Ok(())
    }
}

/// In-memory session hint (ephemeral runs, tests)
#[derive(Default)]
pub struct MemorySessionStore {
    value: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hint(wallet_id: &str) -> Self {
        Self {
            value: Mutex::new(Some(wallet_id.to_string())),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.value.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, wallet_id: &str) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(wallet_id.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
