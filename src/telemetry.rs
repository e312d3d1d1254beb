//! Telemetry metric name constants.
//!
//! Centralised metric names for corral operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `corral_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `namespace`: cache instance name (e.g. "projects")
//! - `layer`: where a hit was served from: "memory" or "persistent"
//! - `provider`: upstream provider name
//! - `status`: outcome: "ok", "error" or "cancelled"

/// Total reads served from cache.
///
/// Labels: `namespace`, `layer` ("memory" | "persistent").
pub const CACHE_HITS_TOTAL: &str = "corral_cache_hits_total";

/// Total reads that found nothing usable in either layer.
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "corral_cache_misses_total";

/// Total upstream fetches started by the cache store.
///
/// Labels: `namespace`, `status` ("ok" | "error" | "cancelled").
pub const FETCHES_TOTAL: &str = "corral_fetches_total";

/// Fetch duration in seconds, from start to settle.
///
/// Labels: `namespace`.
pub const FETCH_DURATION_SECONDS: &str = "corral_fetch_duration_seconds";

/// Total `begin_fetch` calls that joined an already in-flight fetch.
///
/// Labels: `namespace`.
pub const COALESCED_TOTAL: &str = "corral_coalesced_total";

/// Total fetch results dropped by the generation check.
///
/// Labels: `namespace`.
pub const DISCARDED_TOTAL: &str = "corral_discarded_total";

/// Total storage failures swallowed by the persistent layer.
///
/// Labels: `namespace`, `operation` ("get" | "set" | "remove").
pub const STORAGE_ERRORS_TOTAL: &str = "corral_storage_errors_total";

/// Total requests issued to individual providers.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const PROVIDER_REQUESTS_TOTAL: &str = "corral_provider_requests_total";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "corral_retries_total";

/// Duration of individual provider requests in seconds.
///
/// Labels: `provider`.
pub const PROVIDER_REQUEST_DURATION_SECONDS: &str = "corral_provider_request_duration_seconds";
