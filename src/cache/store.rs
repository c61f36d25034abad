//! Backend contract and the in-process store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::error::StoreResult;

/// Key-value backend the cache reads from and writes to.
///
/// Backends may be eventually consistent and may drop entries before their
/// TTL runs out; callers treat `Ok(None)` and `Err(_)` alike on reads.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;
}

/// Longest TTL the in-process store honours; larger values are clamped.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// In-process TTL map.
///
/// Used when no external backend is configured. Expired entries read as
/// absent and are dropped on the next access to their key or on
/// [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(_, exp)| *exp <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let expires_at = Instant::now() + ttl.min(MAX_TTL);
        self.entries
            .write()
            .await
            .insert(key.to_owned(), (value, expires_at));
        Ok(())
    }
}
