//! Session-level invalidation and prefetch.
//!
//! The [`InvalidationBus`] is how code outside any consumer (login and
//! logout flows, account switching, push notifications) reaches the cache.

use std::sync::Arc;

use tracing::{debug, info};

use crate::store::CacheStore;
use crate::types::{Collection, Item, ScopeKey};

/// A change in who the cached data belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A scope became active; its data is prefetched.
    LoggedIn(ScopeKey),
    /// A scope ended; everything cached for it is dropped and the cache
    /// no longer belongs to it.
    LoggedOut(ScopeKey),
    /// One scope replaced another.
    Switched { from: ScopeKey, to: ScopeKey },
}

/// Handle for invalidating, prefetching and warming a shared cache.
pub struct InvalidationBus<T: Item> {
    store: Arc<CacheStore<T>>,
}

impl<T: Item> Clone for InvalidationBus<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: Item> InvalidationBus<T> {
    pub fn new(store: Arc<CacheStore<T>>) -> Self {
        Self { store }
    }

    /// Drop cached state for `scope`, or for whatever scope is active when
    /// `None`. Returns whether the in-memory entry was affected.
    pub fn invalidate(&self, scope: Option<&ScopeKey>) -> bool {
        self.store.invalidate(scope)
    }

    /// Start fetching `scope` in the background so the next mount finds
    /// data. Consumers mounting meanwhile join this fetch.
    ///
    /// Skipped when fresh data for `scope` is already cached.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn prefetch(&self, scope: &ScopeKey) {
        if self.store.is_fresh_for(scope) {
            debug!(scope = %scope, "prefetch skipped, data is fresh");
            return;
        }
        debug!(scope = %scope, "prefetching");
        self.store.begin_fetch(scope).detach();
    }

    /// Hand over a payload obtained elsewhere. The next fetch for `scope`
    /// resolves from it without a network request.
    pub fn warm(&self, scope: &ScopeKey, data: Collection<T>) {
        self.store.fetcher().warm(scope, data);
    }

    /// React to a session change.
    pub fn handle(&self, event: SessionEvent) {
        info!(?event, "session event");
        match event {
            SessionEvent::LoggedIn(scope) => self.prefetch(&scope),
            SessionEvent::LoggedOut(scope) => {
                self.store.end_scope(&scope);
            }
            SessionEvent::Switched { from, to } => {
                self.store.end_scope(&from);
                self.prefetch(&to);
            }
        }
    }
}
