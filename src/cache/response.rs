//! Inbound response cache.
//!
//! [`ResponseCache::serve`] wraps one request: it derives the key, checks
//! freshness against the stored meta, and then either replays the cached
//! entry, answers `304 Not Modified`, or runs the origin through the capture
//! protocol and stores what it produced.
//!
//! The cache never fails a request. Backend read errors count as misses and
//! write errors are dropped; at worst every request goes to the origin.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::capture::{BufferedSink, RecordingSink, ResponseSink};
use super::config::{CacheConfig, DEFAULT_MAX_AGE};
use super::entry::{
    BODY_SUFFIX, CacheEntry, CacheMeta, HEADERS_SUFFIX, META_SUFFIX, decode_body, decode_headers,
    encode_body, encode_headers, fmt_http_date,
};
use super::error::{ConfigError, StoreResult};
use super::freshness::{self, Freshness, FreshnessContext};
use super::key::{CacheKey, CacheKeyBuilder, normalize_vary};
use super::store::CacheStore;
use crate::context::Context;
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{Middleware, Next};

/// Diagnostic header carrying the [`Freshness`] label.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Diagnostic header carrying the computed key.
pub const CACHE_KEY_HEADER: &str = "X-Cache-Key";

/// Headers rebuilt from meta on every cached reply; stored copies are skipped.
const COMMON_HEADERS: [&str; 4] = ["date", "age", "last-modified", "etag"];

/// The handler whose responses are cached.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Produces the response for `request` by writing to `sink`.
    async fn respond(&self, request: &Request, sink: &mut dyn ResponseSink);
}

/// Adapts an `async fn(Request) -> Response` handler into an [`Origin`].
pub struct HandlerOrigin<F>(F);

/// Wraps `handler` so its responses can be served through a [`ResponseCache`].
pub fn origin_fn<F, Fut>(handler: F) -> HandlerOrigin<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    HandlerOrigin(handler)
}

#[async_trait]
impl<F, Fut> Origin for HandlerOrigin<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn respond(&self, request: &Request, sink: &mut dyn ResponseSink) {
        let response = (self.0)(request.clone()).await;
        BufferedSink::replay(response, sink);
    }
}

struct Inner {
    store: Arc<dyn CacheStore>,
    max_age: u64,
    vary: Vec<String>,
    keys: CacheKeyBuilder,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

/// HTTP-aware cache in front of an [`Origin`].
///
/// Cheap to clone; clones share the backend and pending writes.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rttp_cache::cache::{BufferedSink, MemoryStore, ResponseCache, origin_fn};
/// use rttp_cache::http::{Method, Request, Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
/// let origin = origin_fn(|_req: Request| async {
///     Response::new(StatusCode::Ok).header("ETag", "\"abc\"").body("hello")
/// });
/// let request = Request::new(Method::Get, "/docs/foo");
///
/// let mut first = BufferedSink::new();
/// cache.serve(&request, &mut first, &origin).await;
/// cache.flush_pending().await;
///
/// let mut second = BufferedSink::new();
/// cache.serve(&request, &mut second, &origin).await;
/// let response = second.into_response();
/// assert_eq!(response.headers().get("x-cache"), Some("HIT"));
/// assert_eq!(response.body_bytes().as_ref(), b"hello");
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl ResponseCache {
    /// Creates a cache over `store` with the default `max_age` and no Vary set.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_settings(store, DEFAULT_MAX_AGE, Vec::new())
    }

    /// Builds the configured backend and a cache over it.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, ConfigError> {
        let store = config.build_store().await?;
        Ok(Self::with_settings(store, config.max_age, config.vary.clone()))
    }

    fn with_settings(store: Arc<dyn CacheStore>, max_age: u64, vary: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                max_age,
                vary: normalize_vary(vary),
                keys: CacheKeyBuilder::response(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Default freshness lifetime in seconds.
    pub fn max_age(&self) -> u64 {
        self.inner.max_age
    }

    /// The normalized Vary set keys are built from.
    pub fn vary(&self) -> &[String] {
        &self.inner.vary
    }

    /// The key `request` is cached under.
    pub fn key_for(&self, request: &Request) -> CacheKey {
        self.inner
            .keys
            .build(request.path(), &self.inner.vary, request.headers())
    }

    /// Serves `request` to `sink`, consulting the cache first.
    ///
    /// Returns the freshness decision, or `None` when the method bypasses
    /// caching altogether.
    pub async fn serve<O>(
        &self,
        request: &Request,
        sink: &mut dyn ResponseSink,
        origin: &O,
    ) -> Option<Freshness>
    where
        O: Origin + ?Sized,
    {
        if !request.method().is_cacheable() {
            origin.respond(request, sink).await;
            return None;
        }

        let key = self.key_for(request);
        sink.set_header(CACHE_KEY_HEADER, key.as_str());

        let ctx = FreshnessContext::from_request(request, self.inner.max_age);
        let meta = if ctx.bypasses_lookup() {
            None
        } else {
            self.read_meta(&key).await
        };
        let now = SystemTime::now();
        let decision = freshness::evaluate(meta.as_ref(), &ctx, now);
        debug!(key = %key, decision = %decision, "cache lookup");

        match &decision {
            Freshness::NotModified(meta) => send_not_modified(sink, meta, now),
            Freshness::Hit(meta) => match self.read_entry(&key, meta.clone()).await {
                Some(entry) => send_entry(sink, request.method(), &entry, now),
                None => {
                    debug!(key = %key, "entry incomplete, treating as miss");
                    self.revalidate(key, &ctx, &Freshness::Miss, request, sink, origin)
                        .await;
                    return Some(Freshness::Miss);
                }
            },
            Freshness::Stale(_) | Freshness::Miss => {
                self.revalidate(key, &ctx, &decision, request, sink, origin)
                    .await;
            }
        }
        Some(decision)
    }

    /// Waits for every cache write started so far.
    pub async fn flush_pending(&self) {
        let handles = std::mem::take(&mut *self.inner.pending.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "cache write task failed");
            }
        }
    }

    async fn revalidate<O>(
        &self,
        key: CacheKey,
        ctx: &FreshnessContext,
        decision: &Freshness,
        request: &Request,
        sink: &mut dyn ResponseSink,
        origin: &O,
    ) where
        O: Origin + ?Sized,
    {
        sink.set_header(CACHE_STATUS_HEADER, decision.as_str());

        let mut recorder = RecordingSink::new(sink);
        origin.respond(request, &mut recorder).await;
        let declared_vary = recorder.declared_vary();
        let Some(entry) = recorder.into_entry() else {
            debug!(key = %key, "origin response not cacheable");
            return;
        };

        if let Some(declared) = declared_vary {
            if declared != self.inner.vary {
                warn!(
                    key = %key,
                    declared = ?declared,
                    configured = ?self.inner.vary,
                    "response Vary differs from the configured Vary set; entry keyed on the configured set"
                );
            }
        }

        if ctx.no_store {
            debug!(key = %key, "no-store requested, skipping cache write");
            return;
        }
        // HEAD shares the GET key but its response carries no body.
        if request.method() != &Method::Get {
            debug!(key = %key, method = %request.method(), "not a GET, skipping cache write");
            return;
        }

        let ttl = if ctx.max_age > 0 {
            ctx.max_age
        } else {
            self.inner.max_age
        };
        self.spawn_write(key, entry, Duration::from_secs(ttl)).await;
    }

    async fn spawn_write(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) {
        let store = Arc::clone(&self.inner.store);
        let handle = tokio::spawn(async move {
            match write_entry(store.as_ref(), &key, &entry, ttl).await {
                Ok(()) => debug!(key = %key, ttl = ttl.as_secs(), "cached response"),
                Err(e) => debug!(key = %key, error = %e, "cache write dropped"),
            }
        });
        let mut pending = self.inner.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    async fn read_meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let raw = self.read(&key.sub_key(META_SUFFIX)).await?;
        CacheMeta::decode(&raw)
    }

    async fn read_entry(&self, key: &CacheKey, meta: CacheMeta) -> Option<CacheEntry> {
        let headers = decode_headers(&self.read(&key.sub_key(HEADERS_SUFFIX)).await?)?;
        let body = decode_body(&self.read(&key.sub_key(BODY_SUFFIX)).await?)?;
        Some(CacheEntry {
            headers,
            body,
            meta,
        })
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.inner.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }
}

/// Writes headers, then body, then meta. Meta goes last so a partial write
/// is never visible as an entry.
async fn write_entry(
    store: &dyn CacheStore,
    key: &CacheKey,
    entry: &CacheEntry,
    ttl: Duration,
) -> StoreResult<()> {
    store
        .set(&key.sub_key(HEADERS_SUFFIX), encode_headers(&entry.headers), ttl)
        .await?;
    store
        .set(&key.sub_key(BODY_SUFFIX), encode_body(&entry.body), ttl)
        .await?;
    store
        .set(&key.sub_key(META_SUFFIX), entry.meta.encode(), ttl)
        .await
}

fn send_common_headers(sink: &mut dyn ResponseSink, meta: &CacheMeta, now: SystemTime) {
    sink.set_header("Date", &fmt_http_date(now));
    if let Some(age) = meta.age(now) {
        sink.set_header("Age", &age.to_string());
    }
    if let Some(last_modified) = meta.last_modified {
        sink.set_header("Last-Modified", &fmt_http_date(last_modified));
    }
    if let Some(etag) = &meta.etag {
        sink.set_header("ETag", etag);
    }
}

fn send_not_modified(sink: &mut dyn ResponseSink, meta: &CacheMeta, now: SystemTime) {
    sink.set_status(StatusCode::NotModified);
    send_common_headers(sink, meta, now);
    sink.set_header(CACHE_STATUS_HEADER, "NOT_MODIFIED");
    sink.finish();
}

fn send_entry(sink: &mut dyn ResponseSink, method: &Method, entry: &CacheEntry, now: SystemTime) {
    sink.set_status(StatusCode::Ok);
    send_common_headers(sink, &entry.meta, now);
    sink.set_header(CACHE_STATUS_HEADER, "HIT");
    for (name, value) in entry.headers.iter() {
        if COMMON_HEADERS.iter().any(|c| name.eq_ignore_ascii_case(c)) {
            continue;
        }
        sink.set_header(name, value);
    }
    if method != &Method::Head {
        sink.write_chunk(&entry.body);
    }
    sink.finish();
}

/// Hands the rest of the middleware chain to the cache as its origin.
struct NextOrigin {
    chain: Mutex<Option<(Context, Next)>>,
}

#[async_trait]
impl Origin for NextOrigin {
    async fn respond(&self, _request: &Request, sink: &mut dyn ResponseSink) {
        let chain = self.chain.lock().await.take();
        let response = match chain {
            Some((ctx, next)) => next.run(ctx).await,
            None => Response::new(StatusCode::InternalServerError)
                .body("downstream handler already consumed"),
        };
        BufferedSink::replay(response, sink);
    }
}

impl Middleware for ResponseCache {
    /// Short-circuits HITs and 304s; otherwise runs the rest of the chain and
    /// captures its response. Downstream layers find the request's
    /// [`CacheKey`] in the context extensions.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cache = self.clone();
        Box::pin(async move {
            let mut ctx = ctx;
            let request = ctx.request().clone();
            if request.method().is_cacheable() {
                ctx.extensions_mut().insert(cache.key_for(&request));
            }
            let origin = NextOrigin {
                chain: Mutex::new(Some((ctx, next))),
            };
            let mut sink = BufferedSink::new();
            cache.serve(&request, &mut sink, &origin).await;
            sink.into_response()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::error::StoreError;
    use crate::cache::store::MemoryStore;
    use crate::middleware::{from_middleware, handler};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Streams a fixed response and counts how often it runs.
    struct Scripted {
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<&'static [u8]>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(headers: Vec<(&'static str, &'static str)>, chunks: Vec<&'static [u8]>) -> Self {
            Self::with_status(StatusCode::Ok, headers, chunks)
        }

        fn with_status(
            status: StatusCode,
            headers: Vec<(&'static str, &'static str)>,
            chunks: Vec<&'static [u8]>,
        ) -> Self {
            Self {
                status,
                headers,
                chunks,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Origin for Scripted {
        async fn respond(&self, _request: &Request, sink: &mut dyn ResponseSink) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sink.set_status(self.status);
            for (name, value) in &self.headers {
                sink.set_header(name, value);
            }
            for chunk in &self.chunks {
                sink.write_chunk(chunk);
            }
            sink.finish();
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Connection("down".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Connection("down".into()))
        }
    }

    fn memory() -> (Arc<MemoryStore>, ResponseCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store.clone());
        (store, cache)
    }

    async fn serve(
        cache: &ResponseCache,
        request: &Request,
        origin: &dyn Origin,
    ) -> (Option<Freshness>, Response) {
        let mut sink = BufferedSink::new();
        let decision = cache.serve(request, &mut sink, origin).await;
        cache.flush_pending().await;
        (decision, sink.into_response())
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path)
    }

    #[tokio::test]
    async fn docs_scenario() {
        let (_store, cache) = memory();
        let origin = Scripted::ok(vec![("ETag", "\"abc\"")], vec![b"hello"]);
        let request = get("/docs/foo");

        let (decision, first) = serve(&cache, &request, &origin).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(first.body_bytes().as_ref(), b"hello");
        assert_eq!(first.headers().get("x-cache"), Some("MISS"));
        let key = first.headers().get("x-cache-key").unwrap().to_owned();
        let expected = CacheKeyBuilder::response().build("/docs/foo", [""; 0], request.headers());
        assert_eq!(key, expected.as_str());

        let (decision, second) = serve(&cache, &request, &origin).await;
        assert!(matches!(decision, Some(Freshness::Hit(_))));
        assert_eq!(second.status(), StatusCode::Ok);
        assert_eq!(second.body_bytes().as_ref(), b"hello");
        assert_eq!(second.headers().get("x-cache"), Some("HIT"));
        assert_eq!(second.headers().get("etag"), Some("\"abc\""));

        let conditional = get("/docs/foo").header("If-None-Match", "\"abc\"");
        let (decision, third) = serve(&cache, &conditional, &origin).await;
        assert!(matches!(decision, Some(Freshness::NotModified(_))));
        assert_eq!(third.status(), StatusCode::NotModified);
        assert!(third.body_bytes().is_empty());
        assert_eq!(third.headers().get("etag"), Some("\"abc\""));
        assert!(third.headers().contains("date"));
        assert!(third.headers().contains("last-modified"));

        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn hit_replays_headers_and_body_exactly() {
        let (_store, cache) = memory();
        let origin = Scripted::ok(
            vec![
                ("Content-Type", "application/octet-stream"),
                ("Set-Cookie", "a=1"),
                ("Set-Cookie", "b=2"),
                ("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ],
            vec![&[0, 1, 2], &[255, 254]],
        );
        let request = get("/bin").header("Cache-Control", "max-age=2000000000");
        serve(&cache, &request, &origin).await;

        let (_, hit) = serve(&cache, &request, &origin).await;
        assert_eq!(hit.body_bytes().as_ref(), &[0, 1, 2, 255, 254]);
        assert_eq!(
            hit.headers().get_all("set-cookie").collect::<Vec<_>>(),
            vec!["a=1", "b=2"]
        );
        assert_eq!(hit.headers().get("content-type"), Some("application/octet-stream"));
        assert_eq!(hit.headers().get_all("last-modified").count(), 1);
        assert_eq!(
            hit.headers().get("last-modified"),
            Some("Sun, 06 Nov 1994 08:49:37 GMT")
        );
        assert!(hit.headers().get("age").is_some());
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn head_hit_has_no_body() {
        let (_store, cache) = memory();
        let origin = Scripted::ok(vec![("ETag", "\"v\"")], vec![b"payload"]);
        serve(&cache, &get("/h"), &origin).await;

        let (decision, head) = serve(&cache, &Request::new(Method::Head, "/h"), &origin).await;
        assert!(matches!(decision, Some(Freshness::Hit(_))));
        assert!(head.body_bytes().is_empty());
        assert_eq!(head.headers().get("etag"), Some("\"v\""));
        assert_eq!(head.headers().get("x-cache"), Some("HIT"));
    }

    #[tokio::test]
    async fn head_miss_does_not_store_an_empty_body() {
        let (store, cache) = memory();
        let origin = origin_fn(|req: Request| async move {
            let response = Response::new(StatusCode::Ok).header("Content-Type", "text/plain");
            if req.method() == &Method::Head {
                response
            } else {
                response.body("hello")
            }
        });

        let (decision, head) = serve(&cache, &Request::new(Method::Head, "/p"), &origin).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(head.status(), StatusCode::Ok);
        assert_eq!(head.headers().get("x-cache"), Some("MISS"));
        assert!(store.is_empty().await);

        let (decision, got) = serve(&cache, &get("/p"), &origin).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(got.body_bytes().as_ref(), b"hello");

        let (decision, again) = serve(&cache, &get("/p"), &origin).await;
        assert!(matches!(decision, Some(Freshness::Hit(_))));
        assert_eq!(again.body_bytes().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn error_statuses_are_never_cached() {
        for status in [StatusCode::NotFound, StatusCode::InternalServerError] {
            let (store, cache) = memory();
            let origin = Scripted::with_status(status, vec![], vec![b"err"]);
            serve(&cache, &get("/e"), &origin).await;
            let (decision, again) = serve(&cache, &get("/e"), &origin).await;
            assert_eq!(decision, Some(Freshness::Miss));
            assert_eq!(again.status(), status);
            assert_eq!(origin.calls(), 2);
            assert!(store.is_empty().await);
        }
    }

    #[tokio::test]
    async fn unsafe_methods_bypass_everything() {
        let (store, cache) = memory();
        let origin = Scripted::ok(vec![], vec![b"created"]);
        let (decision, response) = serve(&cache, &Request::new(Method::Post, "/p"), &origin).await;
        assert_eq!(decision, None);
        assert!(!response.headers().contains("x-cache-key"));
        assert!(!response.headers().contains("last-modified"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn stale_entry_goes_back_to_origin() {
        let (store, cache) = memory();
        let request = get("/old");
        let key = cache.key_for(&request);
        let long_ago = CacheMeta {
            last_modified: Some(SystemTime::now() - Duration::from_secs(3600)),
            etag: None,
        };
        let ttl = Duration::from_secs(60);
        store.set(&key.sub_key(META_SUFFIX), long_ago.encode(), ttl).await.unwrap();
        store.set(&key.sub_key(HEADERS_SUFFIX), "[]".into(), ttl).await.unwrap();
        store.set(&key.sub_key(BODY_SUFFIX), encode_body(b"old"), ttl).await.unwrap();

        let origin = Scripted::ok(vec![], vec![b"new"]);
        let (decision, response) = serve(&cache, &request, &origin).await;
        assert!(matches!(decision, Some(Freshness::Stale(_))));
        assert_eq!(response.headers().get("x-cache"), Some("STALE"));
        assert_eq!(response.body_bytes().as_ref(), b"new");

        let (decision, response) = serve(&cache, &request, &origin).await;
        assert!(matches!(decision, Some(Freshness::Hit(_))));
        assert_eq!(response.body_bytes().as_ref(), b"new");
    }

    #[tokio::test]
    async fn meta_without_body_degrades_to_miss() {
        let (store, cache) = memory();
        let request = get("/partial");
        let key = cache.key_for(&request);
        let meta = CacheMeta {
            last_modified: Some(SystemTime::now()),
            etag: None,
        };
        store
            .set(&key.sub_key(META_SUFFIX), meta.encode(), Duration::from_secs(60))
            .await
            .unwrap();

        let origin = Scripted::ok(vec![], vec![b"fresh"]);
        let (decision, response) = serve(&cache, &request, &origin).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(response.body_bytes().as_ref(), b"fresh");
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn headers_without_meta_are_a_miss() {
        let (store, cache) = memory();
        let request = get("/orphan");
        let key = cache.key_for(&request);
        let ttl = Duration::from_secs(60);
        store.set(&key.sub_key(HEADERS_SUFFIX), "[]".into(), ttl).await.unwrap();
        store.set(&key.sub_key(BODY_SUFFIX), encode_body(b"ghost"), ttl).await.unwrap();

        let origin = Scripted::ok(vec![], vec![b"real"]);
        let (decision, response) = serve(&cache, &request, &origin).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(response.body_bytes().as_ref(), b"real");
    }

    #[tokio::test]
    async fn no_cache_revalidates_and_refreshes() {
        let (_store, cache) = memory();
        let v1 = Scripted::ok(vec![], vec![b"v1"]);
        let v2 = Scripted::ok(vec![], vec![b"v2"]);
        serve(&cache, &get("/n"), &v1).await;

        let forced = get("/n").header("Cache-Control", "no-cache");
        let (decision, response) = serve(&cache, &forced, &v2).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(response.body_bytes().as_ref(), b"v2");

        let (_, response) = serve(&cache, &get("/n"), &v1).await;
        assert_eq!(response.body_bytes().as_ref(), b"v2");
        assert_eq!(v1.calls(), 1);
    }

    #[tokio::test]
    async fn no_store_skips_the_write() {
        let (store, cache) = memory();
        let origin = Scripted::ok(vec![], vec![b"secret"]);
        let request = get("/s").header("Cache-Control", "no-store");
        serve(&cache, &request, &origin).await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn max_age_zero_skips_lookup_but_still_stores() {
        let (store, cache) = memory();
        let origin = Scripted::ok(vec![], vec![b"x"]);
        serve(&cache, &get("/z").header("Cache-Control", "max-age=0"), &origin).await;
        assert_eq!(store.len().await, 3);
        let (decision, _) = serve(&cache, &get("/z"), &origin).await;
        assert!(matches!(decision, Some(Freshness::Hit(_))));
    }

    #[tokio::test]
    async fn vary_partitions_entries() {
        let cache = ResponseCache::from_config(&CacheConfig::new().vary("Accept-Language"))
            .await
            .unwrap();
        assert_eq!(cache.vary(), ["accept-language"]);
        let en = Scripted::ok(vec![("Vary", "Accept-Language")], vec![b"hello"]);
        let de = Scripted::ok(vec![("Vary", "Accept-Language")], vec![b"hallo"]);

        let en_req = get("/i18n").header("Accept-Language", "en");
        let de_req = get("/i18n").header("Accept-Language", "de");
        serve(&cache, &en_req, &en).await;
        let (decision, response) = serve(&cache, &de_req, &de).await;
        assert_eq!(decision, Some(Freshness::Miss));
        assert_eq!(response.body_bytes().as_ref(), b"hallo");

        let (_, response) = serve(&cache, &en_req, &de).await;
        assert_eq!(response.body_bytes().as_ref(), b"hello");
        assert_eq!(en.calls(), 1);
        assert_eq!(de.calls(), 1);
    }

    #[tokio::test]
    async fn backend_failures_fail_open() {
        let cache = ResponseCache::new(Arc::new(FailingStore));
        let origin = Scripted::ok(vec![], vec![b"ok"]);
        for _ in 0..2 {
            let (decision, response) = serve(&cache, &get("/f"), &origin).await;
            assert_eq!(decision, Some(Freshness::Miss));
            assert_eq!(response.status(), StatusCode::Ok);
            assert_eq!(response.body_bytes().as_ref(), b"ok");
        }
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn handler_origin_adapter() {
        let (_store, cache) = memory();
        let origin = origin_fn(|req: Request| async move {
            Response::new(StatusCode::Ok).body(format!("path={}", req.path()))
        });
        serve(&cache, &get("/fn"), &origin).await;
        let (decision, response) = serve(&cache, &get("/fn"), &origin).await;
        assert!(matches!(decision, Some(Freshness::Hit(_))));
        assert_eq!(response.body_bytes().as_ref(), b"path=/fn");
    }

    #[tokio::test]
    async fn works_as_middleware() {
        let (_store, cache) = memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let chain = vec![
            from_middleware(Arc::new(cache.clone())),
            handler(move |ctx: Context| {
                let counter = Arc::clone(&counter);
                let keyed = ctx.extensions().get::<CacheKey>().is_some();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Response::new(StatusCode::Ok).body(format!("from handler, keyed={keyed}"))
                }
            }),
        ];

        let run = |request: Request| Next::new(chain.clone()).run(Context::new(request));

        let first = run(get("/mw")).await;
        assert_eq!(first.headers().get("x-cache"), Some("MISS"));
        cache.flush_pending().await;

        let second = run(get("/mw")).await;
        assert_eq!(second.headers().get("x-cache"), Some("HIT"));
        assert_eq!(second.body_bytes().as_ref(), b"from handler, keyed=true");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let post = run(Request::new(Method::Post, "/mw")).await;
        assert_eq!(post.body_bytes().as_ref(), b"from handler, keyed=false");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
