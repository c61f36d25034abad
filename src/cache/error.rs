//! Error types for the caching layer.
//!
//! Freshness outcomes (`MISS`, `STALE`, `NOT_MODIFIED`) are not errors; they
//! are [`Freshness`](super::Freshness) variants. The enums here cover the
//! backend, the outbound transport, and configuration.

use thiserror::Error;

/// Result type for backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a [`CacheStore`](super::CacheStore) backend.
///
/// Call sites treat a read failure as a cold cache and ignore write failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// The backend could not be reached.
    #[error("cache backend connection error: {0}")]
    Connection(String),

    /// A blocking backend task panicked or was cancelled.
    #[error("cache backend task failed: {0}")]
    Join(String),
}

/// Failures of the outbound transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Errors surfaced by [`ConditionalFetcher::fetch`](super::ConditionalFetcher::fetch).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The transport failed; nothing was written to the cache.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The origin answered with a status other than 200 or 304.
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),

    /// The origin answered 304 but no cached body exists for the URL.
    #[error("origin returned 304 for {url} but no cached body is stored")]
    MissingCachedBody { url: String },
}

impl FetchError {
    /// Returns the remote status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus(code) => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised while loading configuration or building a backend from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid memcached URL {0:?}, expected memcache://host:port or host:port")]
    InvalidMemcachedUrl(String),

    #[error("the {0} backend is not compiled in")]
    UnsupportedBackend(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}
