//! Activity log
//!
//! Append-only record of wallet and transaction activity, capped to the
//! most recent entries. A pending operation is followed by a separate
//! success or error entry rather than being updated in place.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::TxHash;

/// Default number of retained entries
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    Stake,
    Unstake,
    Claim,
    Swap,
    System,
    Auth,
    Emergency,
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LogCategory::Stake => "STAKE",
            LogCategory::Unstake => "UNSTAKE",
            LogCategory::Claim => "CLAIM",
            LogCategory::Swap => "SWAP",
            LogCategory::System => "SYSTEM",
            LogCategory::Auth => "AUTH",
            LogCategory::Emergency => "EMERGENCY",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Pending,
    Success,
    Error,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Pending => write!(f, "PENDING"),
            LogStatus::Success => write!(f, "SUCCESS"),
            LogStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// A single log entry; immutable once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub category: LogCategory,
    pub status: LogStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded ring buffer of log entries, oldest evicted first
pub struct ActivityLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn record(
        &self,
        category: LogCategory,
        status: LogStatus,
        message: impl Into<String>,
        tx_hash: Option<TxHash>,
    ) -> LogEntry {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            category,
            status,
            message: message.into(),
            tx_hash,
            timestamp: Utc::now(),
        };

        match entry.status {
            LogStatus::Error => error!(
                category = %entry.category,
                tx = ?entry.tx_hash.as_ref().map(TxHash::as_str),
                "{}", entry.message
            ),
            _ => info!(
                category = %entry.category,
                status = %entry.status,
                tx = ?entry.tx_hash.as_ref().map(TxHash::as_str),
                "{}", entry.message
            ),
        }

        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());

        entry
    }

    pub fn pending(&self, category: LogCategory, message: impl Into<String>, tx_hash: Option<TxHash>) -> LogEntry {
        self.record(category, LogStatus::Pending, message, tx_hash)
    }

    pub fn success(&self, category: LogCategory, message: impl Into<String>, tx_hash: Option<TxHash>) -> LogEntry {
        self.record(category, LogStatus::Success, message, tx_hash)
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>, tx_hash: Option<TxHash>) -> LogEntry {
        self.record(category, LogStatus::Error, message, tx_hash)
    }

    /// All retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Restore a log saved with [`ActivityLog::save`]
    ///
    /// A missing file yields an empty log. Only the newest `capacity`
    /// entries are kept.
    pub fn load(path: &Path, capacity: usize) -> Result<Self> {
        let log = Self::new(capacity);
        if !path.exists() {
            return Ok(log);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
        let saved: Vec<LogEntry> = serde_json::from_str(&content)?;

        {
            let mut entries = log.lock();
            let skip = saved.len().saturating_sub(log.capacity);
            entries.extend(saved.into_iter().skip(skip));
        }

        debug!("Loaded {} activity entries from {}", log.len(), path.display());
        Ok(log)
    }

    /// Write all retained entries as JSON, oldest first
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
            }
        }

        let json = serde_json::to_string_pretty(&self.entries())?;
        std::fs::write(path, json)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
