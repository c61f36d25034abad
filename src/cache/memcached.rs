//! Memcached backend.
//!
//! The `memcache` client is blocking, so every call runs under
//! `spawn_blocking`. The client pools its connections and is cheap to clone,
//! so each task takes its own handle and calls run concurrently.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use super::error::{ConfigError, StoreError, StoreResult};
use super::store::CacheStore;

/// Longest exptime memcached treats as relative; larger values are read as
/// an absolute Unix timestamp.
const MAX_RELATIVE_EXPTIME: u64 = 30 * 24 * 60 * 60;

pub struct MemcachedStore {
    client: memcache::Client,
}

impl MemcachedStore {
    /// Connects to the server at `url` (`memcache://host:port` or `host:port`).
    pub async fn connect(url: &str) -> Result<Self, ConfigError> {
        let url = normalize_url(url)?;
        let client = tokio::task::spawn_blocking(move || memcache::connect(url.as_str()))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

pub(crate) fn normalize_url(url: &str) -> Result<String, ConfigError> {
    if url.starts_with("memcache://") {
        Ok(url.to_owned())
    } else if url.contains(':') && !url.contains("://") {
        Ok(format!("memcache://{url}"))
    } else {
        Err(ConfigError::InvalidMemcachedUrl(url.to_owned()))
    }
}

/// Converts `ttl` into a memcached exptime. TTLs past the relative limit
/// become an absolute timestamp `now + ttl`, saturating at `u32::MAX`.
pub(crate) fn expiration(ttl: Duration, now: SystemTime) -> u32 {
    let secs = ttl.as_secs();
    if secs <= MAX_RELATIVE_EXPTIME {
        return secs as u32;
    }
    let now = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    u32::try_from(now.saturating_add(secs)).unwrap_or(u32::MAX)
}

#[async_trait]
impl CacheStore for MemcachedStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let client = self.client.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || client.get::<String>(&key))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let client = self.client.clone();
        let key = key.to_owned();
        let exptime = expiration(ttl, SystemTime::now());
        debug!(key = %key, exptime, "memcached set");
        tokio::task::spawn_blocking(move || client.set(&key, value, exptime))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_normalized() {
        assert_eq!(
            normalize_url("127.0.0.1:11211").unwrap(),
            "memcache://127.0.0.1:11211"
        );
        assert_eq!(
            normalize_url("memcache://cache:11211").unwrap(),
            "memcache://cache:11211"
        );
        assert!(normalize_url("redis://cache:6379").is_err());
        assert!(normalize_url("cache").is_err());
    }

    #[test]
    fn short_ttls_stay_relative() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(expiration(Duration::from_secs(600), now), 600);
        assert_eq!(
            expiration(Duration::from_secs(MAX_RELATIVE_EXPTIME), now),
            2_592_000
        );
    }

    #[test]
    fn long_ttls_become_absolute() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let thirty_one_days = Duration::from_secs(31 * 24 * 60 * 60);
        assert_eq!(expiration(thirty_one_days, now), 1_700_000_000 + 2_678_400);
        assert_eq!(
            expiration(Duration::from_secs(2_000_000_000), now),
            3_700_000_000
        );
        assert_eq!(expiration(Duration::from_secs(3_000_000_000), now), u32::MAX);
        assert_eq!(expiration(Duration::MAX, now), u32::MAX);
    }
}
