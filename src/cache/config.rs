//! Cache configuration.
//!
//! Selects the backend at construction time and holds the inbound cache's
//! defaults. Loadable from JSON:
//!
//! ```
//! use rttp_cache::cache::{CacheConfig, StoreConfig};
//!
//! let config = CacheConfig::from_json_str(r#"{
//!     "max_age": 120,
//!     "vary": ["Accept-Language"],
//!     "store": { "kind": "memcached", "url": "127.0.0.1:11211" }
//! }"#).unwrap();
//!
//! assert_eq!(config.max_age, 120);
//! assert_eq!(config.store, StoreConfig::Memcached { url: "127.0.0.1:11211".into() });
//! ```

use std::sync::Arc;

use serde::Deserialize;

use super::error::ConfigError;
use super::store::{CacheStore, MemoryStore};

/// Default freshness lifetime and TTL, in seconds.
pub const DEFAULT_MAX_AGE: u64 = 600;

/// Which backend to build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-process [`MemoryStore`].
    #[default]
    Memory,
    /// Memcached server; requires the `memcached` feature.
    Memcached { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness lifetime used when the request sends no `max-age`.
    pub max_age: u64,
    /// Request headers the cached responses vary on. Fixed up front because
    /// the key is needed before the origin runs.
    pub vary: Vec<String>,
    pub store: StoreConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            vary: Vec::new(),
            store: StoreConfig::Memory,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn max_age(mut self, secs: u64) -> Self {
        self.max_age = secs;
        self
    }

    /// Adds a header name to the Vary set.
    #[must_use]
    pub fn vary(mut self, header: impl Into<String>) -> Self {
        self.vary.push(header.into());
        self
    }

    #[must_use]
    pub fn memory_store(mut self) -> Self {
        self.store = StoreConfig::Memory;
        self
    }

    #[must_use]
    pub fn memcached(mut self, url: impl Into<String>) -> Self {
        self.store = StoreConfig::Memcached { url: url.into() };
        self
    }

    /// Builds the configured backend.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnsupportedBackend`] when memcached is selected without
    /// the `memcached` feature; connection and URL errors otherwise.
    pub async fn build_store(&self) -> Result<Arc<dyn CacheStore>, ConfigError> {
        match &self.store {
            StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
            #[cfg(feature = "memcached")]
            StoreConfig::Memcached { url } => {
                Ok(Arc::new(super::memcached::MemcachedStore::connect(url).await?))
            }
            #[cfg(not(feature = "memcached"))]
            StoreConfig::Memcached { .. } => Err(ConfigError::UnsupportedBackend("memcached")),
        }
    }
}
