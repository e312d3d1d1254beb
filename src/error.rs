//! Corral error types

use std::sync::Arc;
use std::time::Duration;

/// Corral error types
#[derive(Debug, thiserror::Error)]
pub enum CorralError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    /// Transport-level timeout. Surfaces to consumers exactly like any other
    /// network failure.
    #[error("request timed out")]
    Timeout,

    /// Every configured provider rejected the fetch.
    #[error("all {} sources failed: {}", .errors.len(), summarize(.errors))]
    AllSourcesFailed { errors: Vec<CorralError> },

    /// The fetch was superseded by a scope change or explicitly cancelled.
    ///
    /// Absorbed by the cache store; never reaches a consumer's `error` field.
    #[error("fetch cancelled")]
    Cancelled,

    /// The task running a fetch panicked or was aborted.
    #[error("fetch task failed: {0}")]
    TaskFailed(String),

    // Storage errors (always swallowed by the persistent layer)
    #[error("storage error: {0}")]
    Storage(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("no provider configured")]
    NoProvider,

    #[error("no mutator configured")]
    NoMutator,

    #[error("configuration error: {0}")]
    Configuration(String),
}

fn summarize(errors: &[CorralError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CorralError {
    /// Whether retrying the same request might succeed.
    ///
    /// Rate limits, timeouts, raw transport errors and 5xx responses are
    /// transient. Everything else (auth, bad payloads, configuration) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this error belongs to the network class (what the consumer
    /// sees as "couldn't reach the server").
    pub fn is_network(&self) -> bool {
        match self {
            Self::AllSourcesFailed { .. }
            | Self::Timeout
            | Self::Http(_)
            | Self::Api { .. }
            | Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Whether this is a timeout, either directly or as the only cause of an
    /// aggregated failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::AllSourcesFailed { errors } => {
                !errors.is_empty() && errors.iter().all(CorralError::is_timeout)
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Error shared between every consumer awaiting the same fetch.
pub type SharedError = Arc<CorralError>;

/// Result type alias for Corral operations
pub type Result<T> = std::result::Result<T, CorralError>;

/// Result of operations whose error may be shared between consumers.
pub type SharedResult<T> = std::result::Result<T, SharedError>;
