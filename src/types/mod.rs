//! Public types for the Corral API.

mod item;
mod scope;
mod snapshot;

pub use item::{Collection, Item};
pub use scope::ScopeKey;
pub use snapshot::{CacheSnapshot, CacheState, Freshness, Snapshot};
