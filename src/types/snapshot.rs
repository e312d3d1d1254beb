//! Views of cached state handed to consumers.

use crate::clock::Timestamp;
use crate::error::SharedError;

use super::{Collection, ScopeKey};

/// What a consumer renders: data, a blocking-loading flag and a
/// non-blocking error indicator.
///
/// `loading` is only ever `true` while `data` is `None`; an error never
/// clears data that was already shown.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub data: Option<Collection<T>>,
    pub loading: bool,
    pub error: Option<SharedError>,
}

impl<T> Snapshot<T> {
    /// Nothing usable yet, a fetch is underway.
    pub fn loading() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }

    pub fn ready(data: Collection<T>) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error: None,
        }
    }

    /// Number of items currently held, zero when there is no data.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The in-memory entry as seen through [`CacheStore::read()`](crate::store::CacheStore::read).
#[derive(Debug, Clone)]
pub struct CacheSnapshot<T> {
    pub data: Collection<T>,
    /// Wall-clock milliseconds of the last successful write.
    pub timestamp: Timestamp,
    pub scope: ScopeKey,
    /// Error from the most recent failed fetch, cleared on the next commit.
    pub error: Option<SharedError>,
    /// Set once consecutive failures reach the configured threshold.
    pub degraded: bool,
}

/// Time-based classification of the held data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the stale time; serve without revalidating.
    Fresh,
    /// Older than the stale time but within the cache TTL; serve and
    /// revalidate in the background.
    Stale,
    /// Older than the cache TTL; treat as absent.
    Expired,
    /// No data at all.
    Missing,
}

impl Freshness {
    /// Whether data in this state may be shown to a consumer.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }
}

/// Position of a scope in the cache state machine.
///
/// ```text
/// Empty ──► Fetching ──► Ready ──(time)──► Stale ──► Fetching ──► Ready
///              │
///              └── failure without prior data ──► Error
/// ```
///
/// A failed fetch with prior data leaves the state at `Ready`/`Stale`
/// with the error attached to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fetching,
    Ready,
    Stale,
    Error,
}
