//! Scope-tagged, TTL-bounded persistence of one cached collection.
//!
//! One record per cache instance, stored under a single fixed key:
//!
//! ```json
//! { "version": 1, "scope": "user-1", "timestamp": 1718000000000, "data": [ ... ] }
//! ```
//!
//! Every failure (backend error, quota, corrupt JSON, unknown version) is
//! logged, counted and reported to the caller as a miss. Nothing here
//! returns an error.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, Timestamp};
use crate::telemetry;
use crate::types::{Collection, Item, ScopeKey};

use super::KeyValueStorage;

/// Maximum supported record format version.
const MAX_SUPPORTED_VERSION: u32 = 1;

/// A record read back from storage.
#[derive(Debug, Clone)]
pub struct PersistedRecord<T> {
    pub data: Collection<T>,
    pub scope: ScopeKey,
    pub timestamp: Timestamp,
}

#[derive(Serialize)]
struct RecordRef<'a, T> {
    version: u32,
    scope: &'a ScopeKey,
    timestamp: Timestamp,
    data: &'a [T],
}

#[derive(Deserialize)]
struct RecordOwned<T> {
    version: u32,
    scope: ScopeKey,
    timestamp: Timestamp,
    data: Vec<T>,
}

/// Only the tag, for decisions that don't need the payload.
#[derive(Deserialize)]
struct RecordScope {
    scope: ScopeKey,
}

/// Durable layer of the cache.
pub struct PersistentStore<T> {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    key: String,
    namespace: String,
    ttl: Duration,
    _item: PhantomData<fn() -> T>,
}

impl<T: Item> PersistentStore<T> {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            storage,
            clock,
            key: format!("{namespace}_cache"),
            namespace,
            ttl,
            _item: PhantomData,
        }
    }

    /// The storage key this store reads and writes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the record for `scope` if it exists and is younger than the
    /// TTL. A record for another scope, an expired record, or an unreadable
    /// one is evicted.
    pub fn get(&self, scope: &ScopeKey) -> Option<PersistedRecord<T>> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.storage_error("get", &e);
                return None;
            }
        };

        let record: RecordOwned<T> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "corrupt persisted cache record");
                self.storage_error("get", &e);
                self.evict();
                return None;
            }
        };

        if record.version > MAX_SUPPORTED_VERSION {
            warn!(
                namespace = %self.namespace,
                version = record.version,
                "unsupported persisted cache version"
            );
            self.evict();
            return None;
        }

        if &record.scope != scope {
            debug!(namespace = %self.namespace, stored = %record.scope, requested = %scope, "persisted record belongs to another scope");
            self.evict();
            return None;
        }

        if self.clock.age(record.timestamp) >= self.ttl {
            debug!(namespace = %self.namespace, %scope, "persisted record expired");
            self.evict();
            return None;
        }

        Some(PersistedRecord {
            data: Arc::new(record.data),
            scope: record.scope,
            timestamp: record.timestamp,
        })
    }

    /// Overwrite the record with `data` for `scope`, stamped now.
    ///
    /// Returns whether the write landed.
    pub fn set(&self, data: &[T], scope: &ScopeKey) -> bool {
        self.set_at(data, scope, self.clock.now())
    }

    /// Overwrite the record with an explicit timestamp (used for
    /// write-through so memory and disk agree on the data's age).
    pub fn set_at(&self, data: &[T], scope: &ScopeKey, timestamp: Timestamp) -> bool {
        let record = RecordRef {
            version: MAX_SUPPORTED_VERSION,
            scope,
            timestamp,
            data,
        };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                self.storage_error("set", &e);
                return false;
            }
        };
        match self.storage.set(&self.key, &json) {
            Ok(()) => true,
            Err(e) => {
                self.storage_error("set", &e);
                false
            }
        }
    }

    /// Remove the record regardless of scope.
    pub fn clear(&self) -> bool {
        match self.storage.remove(&self.key) {
            Ok(()) => true,
            Err(e) => {
                self.storage_error("remove", &e);
                false
            }
        }
    }

    /// Remove the record only if it belongs to `scope`.
    ///
    /// Unreadable records are removed too, since nobody can use them.
    pub fn clear_scope(&self, scope: &ScopeKey) -> bool {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                self.storage_error("get", &e);
                return false;
            }
        };
        match serde_json::from_str::<RecordScope>(&raw) {
            Ok(tag) if &tag.scope != scope => false,
            _ => self.clear(),
        }
    }

    fn evict(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            self.storage_error("remove", &e);
        }
    }

    fn storage_error(&self, operation: &'static str, error: &dyn std::fmt::Display) {
        warn!(namespace = %self.namespace, operation, error = %error, "persistent cache operation failed");
        metrics::counter!(telemetry::STORAGE_ERRORS_TOTAL,
            "namespace" => self.namespace.clone(),
            "operation" => operation,
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use crate::{CorralError, Result};
    use serde_json::{Value, json};

    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CorralError::Storage("disk on fire".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(CorralError::Storage("disk on fire".into()))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(CorralError::Storage("disk on fire".into()))
        }
    }

    fn store_with(
        storage: Arc<dyn KeyValueStorage>,
    ) -> (PersistentStore<Value>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = PersistentStore::new(
            storage,
            clock.clone(),
            "projects",
            Duration::from_secs(600),
        );
        (store, clock)
    }

    fn items(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"id": i, "name": format!("p{i}")})).collect()
    }

    #[test]
    fn set_then_get_before_ttl_returns_same_data() {
        let (store, clock) = store_with(Arc::new(MemoryStorage::new()));
        let scope = ScopeKey::from("user1");
        assert!(store.set(&items(3), &scope));

        clock.advance(Duration::from_secs(599));
        let record = store.get(&scope).expect("record within ttl");
        assert_eq!(record.data.as_slice(), items(3).as_slice());
        assert_eq!(record.scope, scope);
        assert_eq!(record.timestamp, 1_000_000);
    }

    #[test]
    fn get_after_ttl_returns_none_and_evicts() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, clock) = store_with(storage.clone());
        let scope = ScopeKey::from("user1");
        store.set(&items(2), &scope);

        clock.advance(Duration::from_secs(600));
        assert!(store.get(&scope).is_none());
        assert_eq!(storage.get("projects_cache").unwrap(), None);
    }

    #[test]
    fn other_scope_is_a_miss_and_evicts() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = store_with(storage.clone());
        store.set(&items(2), &ScopeKey::from("alice"));

        assert!(store.get(&ScopeKey::from("bob")).is_none());
        assert_eq!(storage.get("projects_cache").unwrap(), None);
    }

    #[test]
    fn corrupt_record_is_a_miss() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("projects_cache", "{not json").unwrap();
        let (store, _) = store_with(storage.clone());

        assert!(store.get(&ScopeKey::from("user1")).is_none());
        assert_eq!(storage.get("projects_cache").unwrap(), None);
    }

    #[test]
    fn future_version_is_a_miss() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                "projects_cache",
                r#"{"version":99,"scope":"user1","timestamp":1000000,"data":[]}"#,
            )
            .unwrap();
        let (store, _) = store_with(storage);
        assert!(store.get(&ScopeKey::from("user1")).is_none());
    }

    #[test]
    fn broken_backend_never_panics() {
        let (store, _) = store_with(Arc::new(BrokenStorage));
        let scope = ScopeKey::from("user1");
        assert!(!store.set(&items(1), &scope));
        assert!(store.get(&scope).is_none());
        assert!(!store.clear());
        assert!(!store.clear_scope(&scope));
    }

    #[test]
    fn quota_exceeded_write_is_reported_not_raised() {
        let (store, _) = store_with(Arc::new(MemoryStorage::with_quota(32)));
        assert!(!store.set(&items(50), &ScopeKey::from("user1")));
    }

    #[test]
    fn clear_scope_only_removes_matching_record() {
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = store_with(storage.clone());
        store.set(&items(1), &ScopeKey::from("alice"));

        assert!(!store.clear_scope(&ScopeKey::from("bob")));
        assert!(storage.get("projects_cache").unwrap().is_some());

        assert!(store.clear_scope(&ScopeKey::from("alice")));
        assert_eq!(storage.get("projects_cache").unwrap(), None);
    }
}
