//! Cache configuration.
//!
//! [`CacheConfig`] is the in-process configuration consumed by
//! [`Corral::builder()`](crate::Corral::builder). [`ConfigFile`] is its TOML
//! form, loaded with the following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.corral/config.toml` (user)
//! 3. `/etc/corral/config.toml` (system)
//!
//! ```toml
//! [cache]
//! namespace = "projects"
//! stale_time_secs = 60
//! cache_ttl_secs = 300
//! persistent_ttl_secs = 600
//! revalidate_debounce_ms = 100
//! max_consecutive_failures = 3
//!
//! [storage]
//! dir = "/var/cache/corral"
//!
//! [http]
//! url = "https://api.example.com/projects"
//! timeout_secs = 30
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{CorralError, Result};

/// Default age after which data is served but revalidated.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(60);
/// Default age after which in-memory data is no longer served.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Default age after which a persisted record is evicted on read.
pub const DEFAULT_PERSISTENT_TTL: Duration = Duration::from_secs(600);
/// Default delay before a background revalidation fires.
pub const DEFAULT_REVALIDATE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Configuration for a cache instance.
///
/// ```rust
/// # use corral::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .namespace("projects")
///     .stale_time(Duration::from_secs(30))
///     .max_consecutive_failures(5);
/// assert_eq!(config.storage_key(), "projects_cache");
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache instance name; also derives the storage key. Default: "collection".
    pub namespace: String,
    /// Data younger than this is fresh. Default: 60s.
    pub stale_time: Duration,
    /// Data older than this is not served from memory. Default: 300s.
    pub cache_ttl: Duration,
    /// Persisted records older than this are evicted on read. Default: 600s.
    pub persistent_ttl: Duration,
    /// Delay before a stale read triggers its background fetch. Default: 100ms.
    pub revalidate_debounce: Duration,
    /// Consecutive fetch failures before the entry is flagged degraded.
    /// Default: 3. Zero disables escalation.
    pub max_consecutive_failures: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "collection".to_string(),
            stale_time: DEFAULT_STALE_TIME,
            cache_ttl: DEFAULT_CACHE_TTL,
            persistent_ttl: DEFAULT_PERSISTENT_TTL,
            revalidate_debounce: DEFAULT_REVALIDATE_DEBOUNCE,
            max_consecutive_failures: 3,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn stale_time(mut self, ttl: Duration) -> Self {
        self.stale_time = ttl;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn persistent_ttl(mut self, ttl: Duration) -> Self {
        self.persistent_ttl = ttl;
        self
    }

    pub fn revalidate_debounce(mut self, delay: Duration) -> Self {
        self.revalidate_debounce = delay;
        self
    }

    pub fn max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n;
        self
    }

    /// The single storage key this instance persists under.
    pub fn storage_key(&self) -> String {
        format!("{}_cache", self.namespace)
    }

    /// Reject configurations whose thresholds contradict each other.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CorralError::Configuration(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.stale_time > self.cache_ttl {
            return Err(CorralError::Configuration(format!(
                "stale_time ({:?}) exceeds cache_ttl ({:?})",
                self.stale_time, self.cache_ttl
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TOML file form
// ============================================================================

/// Configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub http: Option<HttpSection>,
}

/// `[cache]` section; every field falls back to the [`CacheConfig`] default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub stale_time_secs: Option<u64>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub persistent_ttl_secs: Option<u64>,
    #[serde(default)]
    pub revalidate_debounce_ms: Option<u64>,
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSection {
    /// Directory for file-backed storage (default: `<cache dir>/corral`).
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// `[http]` section describing the upstream collection endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    pub url: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl From<CacheSection> for CacheConfig {
    fn from(section: CacheSection) -> Self {
        let defaults = CacheConfig::default();
        Self {
            namespace: section.namespace.unwrap_or(defaults.namespace),
            stale_time: section
                .stale_time_secs
                .map_or(defaults.stale_time, Duration::from_secs),
            cache_ttl: section
                .cache_ttl_secs
                .map_or(defaults.cache_ttl, Duration::from_secs),
            persistent_ttl: section
                .persistent_ttl_secs
                .map_or(defaults.persistent_ttl, Duration::from_secs),
            revalidate_debounce: section
                .revalidate_debounce_ms
                .map_or(defaults.revalidate_debounce, Duration::from_millis),
            max_consecutive_failures: section
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures),
        }
    }
}

impl ConfigFile {
    /// Load configuration from the standard locations.
    ///
    /// With no explicit path and no file in the standard locations, the
    /// defaults are returned.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            CorralError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            CorralError::Configuration(msg) => {
                CorralError::Configuration(format!("{msg} (in {path:?})"))
            }
            other => other,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content)
            .map_err(|e| CorralError::Configuration(format!("Failed to parse config: {e}")))?;
        file.cache_config().validate()?;
        Ok(file)
    }

    /// The `[cache]` section as a [`CacheConfig`].
    pub fn cache_config(&self) -> CacheConfig {
        self.cache.clone().into()
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(CorralError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".corral").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/corral/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}
