//! Outbound conditional fetching.
//!
//! [`ConditionalFetcher`] caches bodies fetched from remote URLs and
//! revalidates them with `If-Modified-Since` against the `Last-Modified`
//! value the remote sent last time.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::field::Empty;
use tracing::{Span, debug, instrument};

use super::entry::{BODY_SUFFIX, decode_body, encode_body};
use super::error::{FetchError, TransportError};
use super::key::{CacheKey, CacheKeyBuilder};
use super::store::CacheStore;
use crate::http::Headers;

const LAST_MOD_SUFFIX: &str = "last_mod";
const CACHED_AT_SUFFIX: &str = "cached_at";

/// Status, headers, and body of a remote response.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// Issues outbound GET requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &Headers) -> Result<RemoteResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &Headers) -> Result<RemoteResponse, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(RemoteResponse {
            status,
            headers,
            body,
        })
    }
}

/// Strips userinfo, query, and fragment from `url` so it can be logged.
pub(crate) fn redact_url(url: &str) -> String {
    let url = &url[..url.find(['?', '#']).unwrap_or(url.len())];
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_owned();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
        None => url.to_owned(),
    }
}

/// What the fetcher holds for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCacheRecord {
    pub body: Bytes,
    /// Raw `Last-Modified` value; empty when the remote sent none.
    pub last_modified: String,
    pub cached_at: Option<SystemTime>,
}

/// Fetches remote URLs through the cache, revalidating conditionally.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use rttp_cache::cache::{ConditionalFetcher, MemoryStore, ReqwestTransport};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = ReqwestTransport::new(Duration::from_secs(5))?;
/// let fetcher = ConditionalFetcher::new(Arc::new(MemoryStore::new()), Arc::new(transport));
///
/// let (status, body) = fetcher
///     .fetch("https://example.com/feed.xml", "", Duration::from_secs(3600))
///     .await?;
/// println!("{status}: {} bytes", body.len());
/// # Ok(())
/// # }
/// ```
pub struct ConditionalFetcher {
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
    keys: CacheKeyBuilder,
}

impl ConditionalFetcher {
    pub fn new(store: Arc<dyn CacheStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            keys: CacheKeyBuilder::request(),
        }
    }

    /// Fetches `url`, sending `If-Modified-Since` when a previous
    /// `Last-Modified` is cached and `cache_control` is not `no-cache`.
    ///
    /// Returns `(200, body)` for a fresh download, which is stored for `ttl`,
    /// or `(304, cached body)` when the remote copy is unchanged.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Transport`] when the request itself fails.
    /// - [`FetchError::MissingCachedBody`] on a 304 with nothing cached.
    /// - [`FetchError::UnexpectedStatus`] for any other status.
    ///
    /// The cache is only written on a 200.
    #[instrument(
        skip_all,
        fields(url = %redact_url(url), conditional = Empty, status = Empty)
    )]
    pub async fn fetch(
        &self,
        url: &str,
        cache_control: &str,
        ttl: Duration,
    ) -> Result<(u16, Bytes), FetchError> {
        let key = self.keys.build_url(url);
        let prior = self
            .read(&key.sub_key(LAST_MOD_SUFFIX))
            .await
            .filter(|v| !v.is_empty());

        let mut headers = Headers::new();
        let conditional = match prior {
            Some(last_mod) if !cache_control.trim().eq_ignore_ascii_case("no-cache") => {
                headers.insert("If-Modified-Since", last_mod);
                true
            }
            _ => false,
        };
        Span::current().record("conditional", conditional);

        let response = self.transport.get(url, &headers).await?;
        Span::current().record("status", response.status);

        match response.status {
            304 => {
                let body = self
                    .read(&key.sub_key(BODY_SUFFIX))
                    .await
                    .and_then(|raw| decode_body(&raw))
                    .ok_or_else(|| FetchError::MissingCachedBody {
                        url: url.to_owned(),
                    })?;
                debug!("remote unchanged, serving cached body");
                Ok((304, body))
            }
            200 => {
                let last_mod = response.headers.get("last-modified").unwrap_or_default();
                self.store_fresh(&key, &response.body, last_mod, ttl).await;
                Ok((200, response.body))
            }
            other => Err(FetchError::UnexpectedStatus(other)),
        }
    }

    /// Returns what is cached for `url`, if a body is stored.
    pub async fn cached_record(&self, url: &str) -> Option<RemoteCacheRecord> {
        let key = self.keys.build_url(url);
        let body = decode_body(&self.read(&key.sub_key(BODY_SUFFIX)).await?)?;
        let last_modified = self
            .read(&key.sub_key(LAST_MOD_SUFFIX))
            .await
            .unwrap_or_default();
        let cached_at = self
            .read(&key.sub_key(CACHED_AT_SUFFIX))
            .await
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms));
        Some(RemoteCacheRecord {
            body,
            last_modified,
            cached_at,
        })
    }

    async fn store_fresh(&self, key: &CacheKey, body: &[u8], last_mod: &str, ttl: Duration) {
        let cached_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let writes = [
            (BODY_SUFFIX, encode_body(body)),
            (LAST_MOD_SUFFIX, last_mod.to_owned()),
            (CACHED_AT_SUFFIX, cached_at.to_string()),
        ];
        for (suffix, value) in writes {
            let sub_key = key.sub_key(suffix);
            if let Err(e) = self.store.set(&sub_key, value, ttl).await {
                debug!(key = %sub_key, error = %e, "cache write dropped");
            }
        }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }
}
