//! Builder for configuring cache instances

use std::sync::Arc;

use tracing::info;

use crate::bus::InvalidationBus;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::coordinator::Coordinator;
use crate::fetcher::Fetcher;
#[cfg(feature = "http")]
use crate::providers::HttpCollection;
use crate::providers::{
    CollectionMutator, CollectionProvider, RetryConfig, RetryingCollectionProvider,
};
use crate::storage::{KeyValueStorage, MemoryStorage, PersistentStore};
use crate::store::CacheStore;
use crate::types::{Item, ScopeKey};
use crate::{CorralError, Result};

/// A configured cache instance for one collection resource.
///
/// Cheap to clone; clones share the same store.
pub struct Corral<T: Item> {
    store: Arc<CacheStore<T>>,
    mutator: Option<Arc<dyn CollectionMutator<T>>>,
    bus: InvalidationBus<T>,
}

impl<T: Item> Clone for Corral<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            mutator: self.mutator.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<T: Item> Corral<T> {
    /// Create a new builder for configuring the cache.
    pub fn builder() -> CorralBuilder<T> {
        CorralBuilder::new()
    }

    /// Mount a consumer for `scope`.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(&self, scope: impl Into<ScopeKey>) -> Coordinator<T> {
        Coordinator::mount(Arc::clone(&self.store), self.mutator.clone(), scope.into())
    }

    pub fn bus(&self) -> &InvalidationBus<T> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }
}

/// Builder for configuring cache instances.
pub struct CorralBuilder<T: Item> {
    providers: Vec<Arc<dyn CollectionProvider<T>>>,
    mutator: Option<Arc<dyn CollectionMutator<T>>>,
    storage: Option<Arc<dyn KeyValueStorage>>,
    clock: Option<Arc<dyn Clock>>,
    config: CacheConfig,
    retry: Option<RetryConfig>,
}

impl<T: Item> Default for CorralBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> CorralBuilder<T> {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            mutator: None,
            storage: None,
            clock: None,
            config: CacheConfig::default(),
            retry: None,
        }
    }

    /// Add a provider. All providers race on every fetch.
    pub fn provider(mut self, provider: Arc<dyn CollectionProvider<T>>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Set the mutator used by `create`/`update`/`delete`.
    pub fn mutator(mut self, mutator: Arc<dyn CollectionMutator<T>>) -> Self {
        self.mutator = Some(mutator);
        self
    }

    /// Use an HTTP collection endpoint as both provider and mutator.
    #[cfg(feature = "http")]
    pub fn http(self, collection: HttpCollection<T>) -> Self {
        let collection = Arc::new(collection);
        self.provider(collection.clone()).mutator(collection)
    }

    /// Backend for the persistent layer. Defaults to [`MemoryStorage`],
    /// which does not survive a restart.
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Wrap every provider with retry on transient errors.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Build the cache instance.
    pub fn build(self) -> Result<Corral<T>> {
        if self.providers.is_empty() {
            return Err(CorralError::NoProvider);
        }
        self.config.validate()?;

        let providers: Vec<Arc<dyn CollectionProvider<T>>> = match &self.retry {
            Some(retry) if retry.max_attempts > 1 => self
                .providers
                .into_iter()
                .map(|p| {
                    Arc::new(RetryingCollectionProvider::new(p, retry.clone()))
                        as Arc<dyn CollectionProvider<T>>
                })
                .collect(),
            _ => self.providers,
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let persistent = PersistentStore::new(
            storage,
            Arc::clone(&clock),
            &self.config.namespace,
            self.config.persistent_ttl,
        );
        let fetcher = Fetcher::new(providers, self.config.stale_time);

        info!(
            namespace = %self.config.namespace,
            providers = ?fetcher.provider_names(),
            mutator = self.mutator.as_ref().map(|m| m.name()),
            "cache built"
        );

        let store = Arc::new(CacheStore::new(self.config, fetcher, persistent, clock));
        Ok(Corral {
            bus: InvalidationBus::new(Arc::clone(&store)),
            store,
            mutator: self.mutator,
        })
    }
}
