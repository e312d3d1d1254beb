//! Upstream collaborators: provider/mutator traits and their implementations.
//!
//! - [`traits`]: [`CollectionProvider`] and [`CollectionMutator`].
//! - [`retry`]: [`RetryConfig`] and the [`RetryingCollectionProvider`]
//!   decorator.
//! - [`http`]: [`HttpCollection`], a REST client implementing both traits
//!   (requires the `http` feature).

#[cfg(feature = "http")]
pub mod http;
pub mod retry;
pub mod traits;

#[cfg(feature = "http")]
pub use http::HttpCollection;
pub use retry::{RetryConfig, RetryingCollectionProvider};
pub use traits::{CollectionMutator, CollectionProvider};
