//! Upstream collaborator traits.
//!
//! The cache never talks to a REST API directly. It reads through
//! [`CollectionProvider`]s and writes through a [`CollectionMutator`]:
//!
//! - Providers are interchangeable sources of the same collection; the
//!   [`Fetcher`](crate::fetcher::Fetcher) races them and keeps the first
//!   success.
//! - The mutator performs create/update/delete; the
//!   [`Coordinator`](crate::Coordinator) invalidates and refetches after
//!   every successful write.
//!
//! # Example
//!
//! ```ignore
//! struct ProjectsApi { client: ApiClient }
//!
//! #[async_trait]
//! impl CollectionProvider<Project> for ProjectsApi {
//!     fn name(&self) -> &str { "projects-api" }
//!
//!     async fn list(&self, scope: &ScopeKey) -> Result<Vec<Project>> {
//!         self.client.projects_for(scope.as_str()).await
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::Result;
use crate::types::{Item, ScopeKey};

// ============================================================================
// Collection Provider
// ============================================================================

/// A source of the full collection for a scope.
///
/// Timeouts are the provider's business; report them as
/// [`CorralError::Timeout`](crate::CorralError::Timeout).
#[async_trait]
pub trait CollectionProvider<T: Item>: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Fetch every item visible to `scope`.
    async fn list(&self, scope: &ScopeKey) -> Result<Vec<T>>;
}

// ============================================================================
// Collection Mutator
// ============================================================================

/// Write operations against the upstream collection.
#[async_trait]
pub trait CollectionMutator<T: Item>: Send + Sync {
    /// Mutator name for logging/debugging.
    fn name(&self) -> &str;

    /// Create `item`, returning the stored version (with server-assigned
    /// fields such as the id).
    async fn create(&self, scope: &ScopeKey, item: &T) -> Result<T>;

    /// Replace the stored item with the same id.
    async fn update(&self, scope: &ScopeKey, item: &T) -> Result<T>;

    /// Delete the stored item with the same id.
    async fn delete(&self, scope: &ScopeKey, item: &T) -> Result<()>;
}
