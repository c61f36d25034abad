//! HTTP-aware caching.
//!
//! Two independent halves share one [`CacheStore`] abstraction:
//!
//! - **Inbound**: [`ResponseCache`] sits in front of a handler. It keys
//!   requests on path and Vary headers, decides freshness from the request's
//!   `Cache-Control`, `If-None-Match`, and `If-Modified-Since`, and either
//!   replays a stored 200, answers `304 Not Modified`, or captures the
//!   handler's output through a [`RecordingSink`] and stores it.
//! - **Outbound**: [`ConditionalFetcher`] downloads remote URLs and
//!   revalidates them with `If-Modified-Since`.
//!
//! Every cacheable inbound response carries `X-Cache` (`HIT`, `MISS`,
//! `STALE`, or `NOT_MODIFIED`) and `X-Cache-Key`.

mod capture;
mod config;
mod control;
mod entry;
mod error;
mod fetcher;
pub mod freshness;
mod key;
#[cfg(feature = "memcached")]
mod memcached;
mod response;
mod store;

pub use capture::{BufferedSink, RecordingSink, ResponseSink};
pub use config::{CacheConfig, DEFAULT_MAX_AGE, StoreConfig};
pub use control::CacheControl;
pub use entry::{CacheEntry, CacheMeta};
pub use error::{ConfigError, FetchError, StoreError, StoreResult, TransportError};
pub use fetcher::{ConditionalFetcher, RemoteCacheRecord, RemoteResponse, ReqwestTransport, Transport};
pub use freshness::{Freshness, FreshnessContext};
pub use key::{CacheKey, CacheKeyBuilder, normalize_vary};
#[cfg(feature = "memcached")]
pub use memcached::MemcachedStore;
pub use response::{
    CACHE_KEY_HEADER, CACHE_STATUS_HEADER, HandlerOrigin, Origin, ResponseCache, origin_fn,
};
pub use store::{CacheStore, MemoryStore};
