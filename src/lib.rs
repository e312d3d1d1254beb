//! Corral - shared, scope-partitioned cache for collection resources
//!
//! Every consumer of a collection (a list of projects, tasks, ...) mounts a
//! [`Coordinator`] on the same [`Corral`] instance. Together they get:
//!
//! - stale-while-revalidate reads: cached data is shown immediately and
//!   refreshed in the background once it is older than the stale time;
//! - one upstream request per burst of concurrent loads;
//! - data that survives restarts through a TTL-bounded persistent layer;
//! - strict isolation between scopes (e.g. users): switching scope drops
//!   the old data, and a late response for an old scope is discarded.
//!
//! # Example
//!
//! ```rust,no_run
//! use corral::{CacheConfig, Corral, HttpCollection, ScopeKey};
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> corral::Result<()> {
//!     let cache: Corral<Value> = Corral::builder()
//!         .http(HttpCollection::new("https://api.example.com/users/{scope}/projects")?)
//!         .config(CacheConfig::new().namespace("projects"))
//!         .build()?;
//!
//!     let projects = cache.mount("user-1");
//!     let snapshot = projects.settled().await;
//!     println!("{} projects", snapshot.len());
//!
//!     // Logging out drops everything cached for the user.
//!     cache.bus().invalidate(Some(&ScopeKey::from("user-1")));
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod bus;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod providers;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use builder::{Corral, CorralBuilder};
pub use bus::{InvalidationBus, SessionEvent};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{CacheConfig, ConfigFile};
pub use coordinator::Coordinator;
pub use error::{CorralError, Result, SharedError, SharedResult};
pub use fetcher::Fetcher;
#[cfg(feature = "http")]
pub use providers::HttpCollection;
pub use providers::{CollectionMutator, CollectionProvider, RetryConfig, RetryingCollectionProvider};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, PersistentStore};
pub use store::{CacheHit, CacheLayer, CacheStore, FetchHandle};
pub use version::{PKG_VERSION, version_string};

// Re-export all types
pub use types::{CacheSnapshot, CacheState, Collection, Freshness, Item, ScopeKey, Snapshot};
