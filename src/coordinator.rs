//! Per-consumer view of the shared cache.
//!
//! A [`Coordinator`] is what one consumer (a screen, a widget, a request
//! handler) holds while it displays a collection. Mounting it decides, in
//! order:
//!
//! 1. usable data in memory or the persistent layer: show it right away;
//!    if it is stale, schedule one debounced background revalidation;
//! 2. nothing usable: show `loading` and start (or join) a fetch at once.
//!
//! State changes are published on a [`tokio::sync::watch`] channel. Errors
//! never clear data that is already shown, and cancellations never surface.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, instrument};

use crate::error::{SharedError, SharedResult};
use crate::providers::CollectionMutator;
use crate::store::{CacheStore, FetchHandle};
use crate::types::{Collection, Freshness, Item, ScopeKey, Snapshot};
use crate::CorralError;

/// How many times a cancelled fetch is re-joined while the scope is still
/// active (an invalidation from elsewhere cancels in-flight fetches).
const MAX_REJOINS: usize = 3;

#[derive(Default)]
struct Tasks {
    load: Option<JoinHandle<()>>,
    revalidate: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        if let Some(task) = self.load.take() {
            task.abort();
        }
        if let Some(task) = self.revalidate.take() {
            task.abort();
        }
    }
}

/// One consumer's handle on a scope of the shared cache.
///
/// Dropping it (or calling [`unmount()`](Self::unmount)) aborts only this
/// consumer's background work; fetches other consumers still wait on keep
/// running.
pub struct Coordinator<T: Item> {
    store: Arc<CacheStore<T>>,
    mutator: Option<Arc<dyn CollectionMutator<T>>>,
    scope: ScopeKey,
    state: Arc<watch::Sender<Snapshot<T>>>,
    tasks: Mutex<Tasks>,
}

impl<T: Item> Coordinator<T> {
    /// Mount a consumer for `scope`.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all, fields(scope = %scope))]
    pub fn mount(
        store: Arc<CacheStore<T>>,
        mutator: Option<Arc<dyn CollectionMutator<T>>>,
        scope: ScopeKey,
    ) -> Self {
        let hit = store.read_through(&scope);
        let initial = match &hit {
            Some(hit) => Snapshot {
                data: Some(Arc::clone(&hit.snapshot.data)),
                loading: false,
                error: hit.snapshot.error.clone(),
            },
            None => Snapshot::loading(),
        };
        let (state, _) = watch::channel(initial);

        let coordinator = Self {
            store,
            mutator,
            scope,
            state: Arc::new(state),
            tasks: Mutex::new(Tasks::default()),
        };

        match hit.map(|hit| hit.freshness) {
            Some(Freshness::Fresh) => debug!("mounted with fresh data"),
            Some(_) => coordinator.schedule_revalidation(),
            None => coordinator.spawn_load(),
        }
        coordinator
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }

    /// The current state.
    pub fn read(&self) -> Snapshot<T> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.state.subscribe()
    }

    /// State changes as a stream, starting with the current state.
    pub fn updates(&self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.subscribe())
    }

    /// Wait until the state is no longer loading and return it.
    pub async fn settled(&self) -> Snapshot<T> {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| !s.loading).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.read(),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start (or join) a fetch now and apply its result in the background.
    fn spawn_load(&self) {
        let handle = self.store.begin_fetch(&self.scope);
        let store = Arc::clone(&self.store);
        let scope = self.scope.clone();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let _ = settle(&store, &scope, &state, handle).await;
        });
        if let Some(previous) = self.tasks().load.replace(task) {
            previous.abort();
        }
    }

    /// Revalidate after the debounce delay unless the data turned fresh
    /// or the scope ended in the meantime. A pending revalidation is
    /// replaced.
    fn schedule_revalidation(&self) {
        let store = Arc::clone(&self.store);
        let scope = self.scope.clone();
        let state = Arc::clone(&self.state);
        let delay = store.config().revalidate_debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if store.scope().as_ref() != Some(&scope) {
                debug!(scope = %scope, "scope no longer active, skipping revalidation");
                return;
            }
            if store.is_fresh_for(&scope) {
                debug!(scope = %scope, "already revalidated, skipping");
                if let Some(snapshot) = store.read(&scope) {
                    state.send_replace(Snapshot::ready(snapshot.data));
                }
                return;
            }
            debug!(scope = %scope, "background revalidation");
            let handle = store.begin_fetch(&scope);
            let _ = settle(&store, &scope, &state, handle).await;
        });
        if let Some(previous) = self.tasks().revalidate.replace(task) {
            previous.abort();
        }
    }

    /// Reload the collection.
    ///
    /// Without `skip_cache`, fresh cached data is used as is. With it, a
    /// fetch is always started (or joined). Loading is only signalled when
    /// there is no data to show meanwhile.
    ///
    /// Failures are stored in the state and also returned; cancellations
    /// resolve to `Ok`.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn refetch(&self, skip_cache: bool) -> SharedResult<()> {
        if !skip_cache
            && let Some(cached) = self.store.read(&self.scope)
            && self.store.freshness_of(Some(cached.timestamp)) == Freshness::Fresh
        {
            self.state.send_replace(Snapshot::ready(cached.data));
            return Ok(());
        }

        let handle = self.store.begin_fetch(&self.scope);
        self.state.send_if_modified(|s| {
            if s.data.is_none() && !s.loading {
                s.loading = true;
                true
            } else {
                false
            }
        });
        settle(&self.store, &self.scope, &self.state, handle)
            .await
            .map(|_| ())
    }

    fn mutator(&self) -> SharedResult<&Arc<dyn CollectionMutator<T>>> {
        self.mutator
            .as_ref()
            .ok_or_else(|| Arc::new(CorralError::NoMutator))
    }

    /// Create an item upstream, then reload so the next read includes it.
    pub async fn create(&self, item: &T) -> SharedResult<T> {
        let created = self.mutator()?.create(&self.scope, item).await;
        self.after_mutation(created).await
    }

    /// Update an item upstream, then reload.
    pub async fn update(&self, item: &T) -> SharedResult<T> {
        let updated = self.mutator()?.update(&self.scope, item).await;
        self.after_mutation(updated).await
    }

    /// Delete an item upstream, then reload.
    pub async fn delete(&self, item: &T) -> SharedResult<()> {
        let deleted = self.mutator()?.delete(&self.scope, item).await;
        self.after_mutation(deleted).await
    }

    async fn after_mutation<R>(&self, result: crate::Result<R>) -> SharedResult<R> {
        match result {
            Ok(value) => {
                self.store.invalidate(Some(&self.scope));
                // The mutation itself succeeded; a failed reload is
                // reported through the state only.
                let _ = self.refetch(true).await;
                Ok(value)
            }
            Err(e) => {
                let error = Arc::new(e);
                self.state.send_modify(|s| s.error = Some(Arc::clone(&error)));
                Err(error)
            }
        }
    }

    /// Stop this consumer's background work.
    pub fn unmount(self) {}
}

impl<T: Item> Drop for Coordinator<T> {
    fn drop(&mut self) {
        self.tasks().abort_all();
    }
}

/// Await `handle` and fold its outcome into `state`.
///
/// A cancelled fetch is re-joined while `scope` is still the store's active
/// scope; once the scope is gone the consumer simply stops loading.
async fn settle<T: Item>(
    store: &Arc<CacheStore<T>>,
    scope: &ScopeKey,
    state: &watch::Sender<Snapshot<T>>,
    mut handle: FetchHandle<T>,
) -> SharedResult<Option<Collection<T>>> {
    let mut rejoins = 0;
    loop {
        match handle.await {
            Ok(data) => {
                state.send_replace(Snapshot::ready(Arc::clone(&data)));
                return Ok(Some(data));
            }
            Err(e) if e.is_cancelled() => {
                if rejoins < MAX_REJOINS && store.scope().as_ref() == Some(scope) {
                    rejoins += 1;
                    debug!(scope = %scope, rejoins, "fetch cancelled, joining the current one");
                    handle = store.begin_fetch(scope);
                    continue;
                }
                state.send_if_modified(|s| std::mem::replace(&mut s.loading, false));
                return Ok(None);
            }
            Err(e) => {
                apply_error(state, e.clone());
                return Err(e);
            }
        }
    }
}

fn apply_error<T>(state: &watch::Sender<Snapshot<T>>, error: SharedError) {
    state.send_modify(|s| {
        s.loading = false;
        s.error = Some(error);
    });
}
