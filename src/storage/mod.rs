//! Durable key/value storage.
//!
//! The persistent layer never talks to a concrete backend; it goes through
//! the fallible [`KeyValueStorage`] capability so tests (and hosts with odd
//! storage) can inject their own implementation:
//!
//! - [`MemoryStorage`]: in-process map with an optional byte quota, the
//!   analogue of browser local storage. Useful in tests.
//! - [`FileStorage`]: one file per key under a cache directory; survives
//!   restarts.
//!
//! [`PersistentStore`] layers the cache record format, TTL and scope
//! tagging on top, and swallows every backend failure.

pub mod file;
pub mod persistent;

pub use file::FileStorage;
pub use persistent::{PersistedRecord, PersistentStore};

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{CorralError, Result};

/// Synchronous, fallible key/value storage with string payloads.
///
/// Implementations report failures (quota exceeded, I/O errors) as
/// [`CorralError::Storage`]; callers decide whether they are fatal.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage with an optional capacity in bytes.
///
/// Capacity counts key and value lengths. A write that would push the total
/// over the quota fails and leaves the previous value in place.
///
/// ```rust
/// # use corral::storage::{KeyValueStorage, MemoryStorage};
/// let storage = MemoryStorage::with_quota(8);
/// assert!(storage.set("k", "short").is_ok());
/// assert!(storage.set("k", "far too long").is_err());
/// assert_eq!(storage.get("k").unwrap().as_deref(), Some("short"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    /// Unbounded storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes beyond `bytes` total.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    /// Total bytes held (keys plus values).
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|e| {
            CorralError::Storage(format!("failed to acquire read lock: {e}"))
        })?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| {
            CorralError::Storage(format!("failed to acquire write lock: {e}"))
        })?;
        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(CorralError::Storage(format!(
                    "quota exceeded: {needed} bytes needed, {quota} allowed"
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| {
            CorralError::Storage(format!("failed to acquire write lock: {e}"))
        })?;
        entries.remove(key);
        Ok(())
    }
}
