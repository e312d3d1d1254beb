//! The shared in-memory cache entry and its fetch lifecycle.
//!
//! A [`CacheStore`] holds exactly one scope at a time. Every consumer of
//! the same cache instance reads and fetches through it, which gives three
//! guarantees:
//!
//! - **Coalescing**: while a fetch for the active scope is in flight,
//!   [`begin_fetch()`](CacheStore::begin_fetch) joins it instead of
//!   starting another.
//! - **Generations**: every scope switch and invalidation bumps a counter.
//!   A fetch only commits if the counter still equals the value it started
//!   with, so a superseded result can never overwrite newer state.
//! - **Interest**: each [`FetchHandle`] counts as one interested consumer.
//!   When the last handle of an unfinished fetch is dropped, the fetch is
//!   cancelled.
//!
//! Fetches run on their own tokio task, so a result is committed (and
//! written through to the [`PersistentStore`]) whether or not any handle
//! is still polled.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Timestamp};
use crate::config::CacheConfig;
use crate::error::{SharedError, SharedResult};
use crate::fetcher::Fetcher;
use crate::storage::{PersistedRecord, PersistentStore};
use crate::telemetry;
use crate::types::{CacheSnapshot, CacheState, Collection, Freshness, Item, ScopeKey};
use crate::CorralError;

type SharedFetch<T> = Shared<BoxFuture<'static, SharedResult<Collection<T>>>>;

/// Which layer answered a [`read_through()`](CacheStore::read_through).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    Memory,
    Persistent,
}

impl CacheLayer {
    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Persistent => "persistent",
        }
    }
}

/// Usable data found by [`CacheStore::read_through()`].
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    pub snapshot: CacheSnapshot<T>,
    /// Either [`Freshness::Fresh`] or [`Freshness::Stale`].
    pub freshness: Freshness,
    pub layer: CacheLayer,
}

struct PendingFetch<T: Item> {
    generation: u64,
    scope: ScopeKey,
    future: SharedFetch<T>,
    cancel: CancellationToken,
    interest: usize,
}

impl<T: Item> PendingFetch<T> {
    /// Still worth joining: not cancelled and not yet settled.
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.future.peek().is_none()
    }
}

struct Entry<T: Item> {
    data: Option<Collection<T>>,
    timestamp: Option<Timestamp>,
    scope: Option<ScopeKey>,
    pending: Option<PendingFetch<T>>,
    generation: u64,
    last_error: Option<SharedError>,
    consecutive_failures: u32,
}

impl<T: Item> Entry<T> {
    fn empty() -> Self {
        Self {
            data: None,
            timestamp: None,
            scope: None,
            pending: None,
            generation: 0,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    /// Drop data and any in-flight fetch; bump the generation.
    fn reset(&mut self) {
        self.generation += 1;
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.data = None;
        self.timestamp = None;
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    fn holds(&self, scope: &ScopeKey) -> bool {
        self.scope.as_ref() == Some(scope)
    }
}

/// Single-scope in-memory cache shared by every consumer of one resource.
pub struct CacheStore<T: Item> {
    entry: Mutex<Entry<T>>,
    fetcher: Fetcher<T>,
    persistent: PersistentStore<T>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl<T: Item> CacheStore<T> {
    pub fn new(
        config: CacheConfig,
        fetcher: Fetcher<T>,
        persistent: PersistentStore<T>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entry: Mutex::new(Entry::empty()),
            fetcher,
            persistent,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    pub fn persistent(&self) -> &PersistentStore<T> {
        &self.persistent
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, Entry<T>> {
        // Entry invariants hold between statements, so a poisoned lock is
        // still consistent.
        self.entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The scope the entry currently belongs to.
    pub fn scope(&self) -> Option<ScopeKey> {
        self.lock().scope.clone()
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Whether a live fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.lock().pending.as_ref().is_some_and(PendingFetch::is_live)
    }

    /// Number of handles interested in the in-flight fetch.
    pub fn interest(&self) -> usize {
        self.lock().pending.as_ref().map_or(0, |p| p.interest)
    }

    fn snapshot(&self, entry: &Entry<T>) -> Option<CacheSnapshot<T>> {
        let threshold = self.config.max_consecutive_failures;
        Some(CacheSnapshot {
            data: entry.data.clone()?,
            timestamp: entry.timestamp?,
            scope: entry.scope.clone()?,
            error: entry.last_error.clone(),
            degraded: threshold > 0 && entry.consecutive_failures >= threshold,
        })
    }

    /// The current entry, if it holds data for `scope`.
    pub fn read(&self, scope: &ScopeKey) -> Option<CacheSnapshot<T>> {
        let entry = self.lock();
        if !entry.holds(scope) {
            return None;
        }
        self.snapshot(&entry)
    }

    /// Classify data written at `timestamp`.
    pub fn freshness_of(&self, timestamp: Option<Timestamp>) -> Freshness {
        let Some(ts) = timestamp else {
            return Freshness::Missing;
        };
        let age = self.clock.age(ts);
        if age < self.config.stale_time {
            Freshness::Fresh
        } else if age < self.config.cache_ttl {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Freshness of the current entry.
    pub fn freshness(&self) -> Freshness {
        let timestamp = self.lock().timestamp;
        self.freshness_of(timestamp)
    }

    /// Age of the current entry's data.
    pub fn age(&self) -> Option<Duration> {
        let timestamp = self.lock().timestamp;
        timestamp.map(|ts| self.clock.age(ts))
    }

    /// Whether data exists and is younger than the stale time.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_within(self.config.stale_time)
    }

    /// Whether data exists and is younger than `ttl`.
    pub fn is_fresh_within(&self, ttl: Duration) -> bool {
        self.age().is_some_and(|age| age < ttl)
    }

    /// Whether data exists and is younger than the cache TTL.
    pub fn is_valid(&self) -> bool {
        self.is_fresh_within(self.config.cache_ttl)
    }

    /// Whether the entry holds fresh data for `scope`.
    pub fn is_fresh_for(&self, scope: &ScopeKey) -> bool {
        let timestamp = {
            let entry = self.lock();
            if !entry.holds(scope) || entry.data.is_none() {
                return false;
            }
            entry.timestamp
        };
        self.freshness_of(timestamp) == Freshness::Fresh
    }

    /// Where `scope` sits in the cache state machine.
    pub fn state(&self, scope: &ScopeKey) -> CacheState {
        let entry = self.lock();
        if !entry.holds(scope) {
            return CacheState::Empty;
        }
        if entry.pending.as_ref().is_some_and(PendingFetch::is_live) {
            return CacheState::Fetching;
        }
        if entry.data.is_none() {
            return if entry.last_error.is_some() {
                CacheState::Error
            } else {
                CacheState::Empty
            };
        }
        let timestamp = entry.timestamp;
        drop(entry);
        match self.freshness_of(timestamp) {
            Freshness::Fresh => CacheState::Ready,
            Freshness::Stale => CacheState::Stale,
            // Past the cache TTL, read_through still serves the persisted
            // copy as stale.
            Freshness::Expired | Freshness::Missing => {
                if self.persistent.get(scope).is_some() {
                    CacheState::Stale
                } else {
                    CacheState::Empty
                }
            }
        }
    }

    /// Look for usable data for `scope`: memory first, then the persistent
    /// layer. A persistent hit hydrates memory.
    ///
    /// Memory data past the cache TTL is skipped. Persisted data is usable
    /// for its whole persistent TTL and reported stale once it is older
    /// than the stale time.
    pub fn read_through(&self, scope: &ScopeKey) -> Option<CacheHit<T>> {
        let namespace = self.config.namespace.clone();
        let memory = {
            let entry = self.lock();
            if entry.holds(scope) { self.snapshot(&entry) } else { None }
        };
        if let Some(snapshot) = memory {
            let freshness = self.freshness_of(Some(snapshot.timestamp));
            if freshness.is_usable() {
                return Some(self.record_hit(snapshot, freshness, CacheLayer::Memory));
            }
        }

        match self.persistent.get(scope) {
            Some(record) => {
                let freshness = match self.freshness_of(Some(record.timestamp)) {
                    Freshness::Fresh => Freshness::Fresh,
                    _ => Freshness::Stale,
                };
                let snapshot = self.hydrate(record);
                Some(self.record_hit(snapshot, freshness, CacheLayer::Persistent))
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => namespace)
                    .increment(1);
                None
            }
        }
    }

    fn record_hit(
        &self,
        snapshot: CacheSnapshot<T>,
        freshness: Freshness,
        layer: CacheLayer,
    ) -> CacheHit<T> {
        metrics::counter!(telemetry::CACHE_HITS_TOTAL,
            "namespace" => self.config.namespace.clone(),
            "layer" => layer.as_str(),
        )
        .increment(1);
        debug!(scope = %snapshot.scope, layer = layer.as_str(), ?freshness, "cache hit");
        CacheHit {
            snapshot,
            freshness,
            layer,
        }
    }

    /// Load a persisted record into memory.
    ///
    /// A record for another scope switches the entry to that scope. Within
    /// the same scope, memory keeps whichever data is newer and an in-flight
    /// fetch is left alone.
    pub fn hydrate(&self, record: PersistedRecord<T>) -> CacheSnapshot<T> {
        let mut entry = self.lock();
        if !entry.holds(&record.scope) {
            self.switch_scope(&mut entry, &record.scope);
        }
        if entry.timestamp.is_none_or(|ts| ts < record.timestamp) {
            entry.data = Some(record.data);
            entry.timestamp = Some(record.timestamp);
        }
        let threshold = self.config.max_consecutive_failures;
        CacheSnapshot {
            data: entry.data.clone().unwrap_or_default(),
            timestamp: entry.timestamp.unwrap_or(record.timestamp),
            scope: record.scope,
            error: entry.last_error.clone(),
            degraded: threshold > 0 && entry.consecutive_failures >= threshold,
        }
    }

    fn switch_scope(&self, entry: &mut Entry<T>, scope: &ScopeKey) {
        if let Some(previous) = &entry.scope {
            info!(from = %previous, to = %scope, "scope changed, dropping cached data");
        }
        entry.reset();
        entry.scope = Some(scope.clone());
    }

    /// Start a fetch for `scope`, or join the one already in flight.
    ///
    /// A different scope than the entry currently holds switches the entry:
    /// data is dropped, the old fetch is cancelled and the generation bumps.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_fetch(self: &Arc<Self>, scope: &ScopeKey) -> FetchHandle<T> {
        let mut entry = self.lock();

        if entry.holds(scope)
            && let Some(pending) = entry.pending.as_mut()
            && pending.scope == *scope
            && pending.is_live()
        {
            pending.interest += 1;
            metrics::counter!(telemetry::COALESCED_TOTAL,
                "namespace" => self.config.namespace.clone(),
            )
            .increment(1);
            debug!(scope = %scope, interest = pending.interest, "joined in-flight fetch");
            return FetchHandle::new(pending.future.clone(), Arc::downgrade(self), pending.generation);
        }

        if entry.holds(scope) {
            entry.generation += 1;
            if let Some(stale) = entry.pending.take() {
                stale.cancel.cancel();
            }
        } else {
            self.switch_scope(&mut entry, scope);
        }

        let generation = entry.generation;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run_fetch(
            scope.clone(),
            generation,
            cancel.clone(),
        ));

        let store = Arc::downgrade(self);
        let future = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let error = Arc::new(CorralError::TaskFailed(join_error.to_string()));
                    if let Some(store) = store.upgrade() {
                        store.fail(generation, Arc::clone(&error));
                    }
                    Err(error)
                }
            }
        }
        .boxed()
        .shared();

        debug!(scope = %scope, generation, "fetch started");
        entry.pending = Some(PendingFetch {
            generation,
            scope: scope.clone(),
            future: future.clone(),
            cancel,
            interest: 1,
        });
        FetchHandle::new(future, Arc::downgrade(self), generation)
    }

    async fn run_fetch(
        self: Arc<Self>,
        scope: ScopeKey,
        generation: u64,
        cancel: CancellationToken,
    ) -> SharedResult<Collection<T>> {
        let start = Instant::now();
        let result = self.fetcher.race(&scope, &cancel).await;
        metrics::histogram!(telemetry::FETCH_DURATION_SECONDS,
            "namespace" => self.config.namespace.clone(),
        )
        .record(start.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_cancelled() => "cancelled",
            Err(_) => "error",
        };
        metrics::counter!(telemetry::FETCHES_TOTAL,
            "namespace" => self.config.namespace.clone(),
            "status" => status,
        )
        .increment(1);

        match result {
            Ok(data) => {
                if self.complete(generation, Arc::clone(&data)) {
                    Ok(data)
                } else {
                    Err(Arc::new(CorralError::Cancelled))
                }
            }
            Err(e) => {
                let error = Arc::new(e);
                self.fail(generation, Arc::clone(&error));
                Err(error)
            }
        }
    }

    /// Commit a successful fetch started at `generation`.
    ///
    /// Returns `false`, leaving the entry untouched, if the generation has
    /// moved on. On commit the timestamp never goes backwards and the data
    /// is written through to the persistent layer.
    pub fn complete(&self, generation: u64, data: Collection<T>) -> bool {
        let mut entry = self.lock();
        if entry.generation != generation {
            self.discard(generation, entry.generation);
            return false;
        }

        let timestamp = self.clock.now().max(entry.timestamp.unwrap_or(0));
        entry.pending = None;
        entry.data = Some(Arc::clone(&data));
        entry.timestamp = Some(timestamp);
        entry.last_error = None;
        if entry.consecutive_failures > 0 {
            info!(
                failures = entry.consecutive_failures,
                "fetch succeeded after failures"
            );
        }
        entry.consecutive_failures = 0;

        if let Some(scope) = entry.scope.clone() {
            debug!(scope = %scope, items = data.len(), generation, "fetch committed");
            self.persistent.set_at(&data, &scope, timestamp);
        }
        true
    }

    /// Record a failed fetch started at `generation`.
    ///
    /// Existing data is kept. A cancellation only clears the in-flight
    /// marker and is never surfaced as an error.
    pub fn fail(&self, generation: u64, error: SharedError) -> bool {
        let mut entry = self.lock();
        if entry.generation != generation {
            self.discard(generation, entry.generation);
            return false;
        }
        entry.pending = None;
        if error.is_cancelled() {
            debug!(generation, "fetch cancelled");
            return true;
        }

        entry.consecutive_failures += 1;
        entry.last_error = Some(Arc::clone(&error));
        let failures = entry.consecutive_failures;
        let threshold = self.config.max_consecutive_failures;
        let scope = entry.scope.as_ref().map(ScopeKey::as_str).unwrap_or("");
        if threshold > 0 && failures == threshold {
            error!(
                scope,
                failures,
                error = %error,
                "fetches keep failing, serving cached data as degraded"
            );
        } else {
            warn!(scope, failures, error = %error, "fetch failed");
        }
        true
    }

    fn discard(&self, generation: u64, current: u64) {
        metrics::counter!(telemetry::DISCARDED_TOTAL,
            "namespace" => self.config.namespace.clone(),
        )
        .increment(1);
        debug!(generation, current, "discarding superseded fetch result");
    }

    /// Drop cached state.
    ///
    /// With no scope, or the scope the entry holds, memory is reset and the
    /// persistent record removed; returns `true`. For any other scope only
    /// a persisted record of that scope is removed; returns `false`.
    pub fn invalidate(&self, scope: Option<&ScopeKey>) -> bool {
        let mut entry = self.lock();
        let matches = scope.is_none_or(|s| entry.holds(s));
        if !matches {
            if let Some(scope) = scope {
                self.persistent.clear_scope(scope);
            }
            return false;
        }

        entry.reset();
        self.persistent.clear();
        info!(
            scope = entry.scope.as_ref().map(ScopeKey::as_str).unwrap_or(""),
            generation = entry.generation,
            "cache invalidated"
        );
        true
    }

    /// End `scope`, as on logout.
    ///
    /// Like [`invalidate()`](Self::invalidate), but the entry is also
    /// unbound, so no consumer can re-join or revalidate the ended scope
    /// until it is mounted or prefetched again. Returns whether the entry
    /// held `scope`.
    pub fn end_scope(&self, scope: &ScopeKey) -> bool {
        let mut entry = self.lock();
        if !entry.holds(scope) {
            self.persistent.clear_scope(scope);
            return false;
        }

        entry.reset();
        entry.scope = None;
        self.persistent.clear();
        info!(scope = %scope, generation = entry.generation, "scope ended");
        true
    }

    fn release(&self, generation: u64) {
        let mut entry = self.lock();
        let Some(pending) = entry.pending.as_mut() else {
            return;
        };
        if pending.generation != generation {
            return;
        }
        pending.interest = pending.interest.saturating_sub(1);
        if pending.interest == 0 && pending.future.peek().is_none() {
            debug!(generation, "no consumer left, cancelling fetch");
            pending.cancel.cancel();
        }
    }
}

/// Registration of one consumer's interest in a fetch.
struct Interest<T: Item> {
    store: Weak<CacheStore<T>>,
    generation: u64,
    detached: bool,
}

impl<T: Item> Drop for Interest<T> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.release(self.generation);
        }
    }
}

pin_project_lite::pin_project! {
    /// A consumer's view of an in-flight fetch.
    ///
    /// Resolves to the fetched collection, or to the shared error. Dropping
    /// the last handle before the fetch settles cancels it.
    #[must_use = "dropping the last handle cancels the fetch"]
    pub struct FetchHandle<T: Item> {
        #[pin]
        future: SharedFetch<T>,
        interest: Interest<T>,
    }
}

impl<T: Item> FetchHandle<T> {
    fn new(future: SharedFetch<T>, store: Weak<CacheStore<T>>, generation: u64) -> Self {
        Self {
            future,
            interest: Interest {
                store,
                generation,
                detached: false,
            },
        }
    }

    /// Generation the fetch started at.
    pub fn generation(&self) -> u64 {
        self.interest.generation
    }

    /// Let the fetch run to completion without holding on to it.
    ///
    /// Its interest is never released, so it is cancelled only by a scope
    /// switch or an invalidation.
    pub fn detach(mut self) {
        self.interest.detached = true;
    }
}

impl<T: Item> Future for FetchHandle<T> {
    type Output = SharedResult<Collection<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().future.poll(cx)
    }
}
