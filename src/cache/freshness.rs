//! The freshness decision engine.
//!
//! [`evaluate`] is a pure function of the stored meta, the request's
//! conditions, and the current time. Rules apply in a fixed order and the
//! first match wins:
//!
//! 1. `max_age == 0` → MISS
//! 2. `no_cache` → MISS
//! 3. no stored meta → MISS
//! 4. older than `max_age` → STALE (skipped without a last-modified time)
//! 5. `If-Modified-Since` not older than last-modified → NOT_MODIFIED
//! 6. `If-None-Match` equals the stored ETag → NOT_MODIFIED
//! 7. otherwise → HIT

use std::fmt;
use std::time::{Duration, SystemTime};

use super::control::CacheControl;
use super::entry::{CacheMeta, parse_http_date, whole_seconds};
use crate::http::Request;

/// Per-request conditions, derived from request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessContext {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<SystemTime>,
    pub no_cache: bool,
    /// The request asked that nothing be stored; implies `no_cache`.
    pub no_store: bool,
    /// Maximum acceptable age in seconds.
    pub max_age: u64,
}

impl FreshnessContext {
    /// Reads `Cache-Control`, `If-Modified-Since`, and `If-None-Match` from
    /// `request`. A request `max-age` overrides `default_max_age`; a
    /// `no-store` directive is treated like `no-cache`.
    pub fn from_request(request: &Request, default_max_age: u64) -> Self {
        let headers = request.headers();
        let cc = headers
            .get("cache-control")
            .map(CacheControl::parse)
            .unwrap_or_default();
        Self {
            if_none_match: headers.get("if-none-match").map(|v| v.trim().to_owned()),
            if_modified_since: headers.get("if-modified-since").and_then(parse_http_date),
            no_cache: cc.no_cache || cc.no_store,
            no_store: cc.no_store,
            max_age: cc.max_age.unwrap_or(default_max_age),
        }
    }

    /// Returns `true` when rules 1 or 2 decide the outcome, so the backend
    /// does not need to be consulted at all.
    pub fn bypasses_lookup(&self) -> bool {
        self.max_age == 0 || self.no_cache
    }
}

/// Outcome of a freshness check.
///
/// Variants that were judged against a stored entry carry its meta, so the
/// caller can emit validators without reading it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Hit(CacheMeta),
    Stale(CacheMeta),
    NotModified(CacheMeta),
    Miss,
}

impl Freshness {
    /// Diagnostic label, as written to `X-Cache`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit(_) => "HIT",
            Self::Stale(_) => "STALE",
            Self::NotModified(_) => "NOT_MODIFIED",
            Self::Miss => "MISS",
        }
    }

    /// `true` for outcomes that require running the origin.
    pub fn needs_origin(&self) -> bool {
        matches!(self, Self::Miss | Self::Stale(_))
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides how a request relates to the stored entry described by `meta`.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use rttp_cache::cache::{CacheMeta, Freshness, FreshnessContext, freshness};
///
/// let now = SystemTime::now();
/// let meta = CacheMeta { last_modified: Some(now - Duration::from_secs(10)), etag: Some("\"abc\"".into()) };
/// let ctx = FreshnessContext { max_age: 600, if_none_match: Some("\"abc\"".into()), ..Default::default() };
///
/// assert!(matches!(freshness::evaluate(Some(&meta), &ctx, now), Freshness::NotModified(_)));
/// assert_eq!(freshness::evaluate(Some(&meta), &FreshnessContext::default(), now), Freshness::Miss);
/// ```
pub fn evaluate(meta: Option<&CacheMeta>, ctx: &FreshnessContext, now: SystemTime) -> Freshness {
    if ctx.bypasses_lookup() {
        return Freshness::Miss;
    }
    let Some(meta) = meta else {
        return Freshness::Miss;
    };

    if let Some(last_modified) = meta.last_modified {
        let age = now.duration_since(last_modified).unwrap_or_default();
        if age > Duration::from_secs(ctx.max_age) {
            return Freshness::Stale(meta.clone());
        }
        if let Some(since) = ctx.if_modified_since {
            if whole_seconds(last_modified) <= whole_seconds(since) {
                return Freshness::NotModified(meta.clone());
            }
        }
    }

    if let (Some(wanted), Some(etag)) = (&ctx.if_none_match, &meta.etag) {
        if wanted == etag {
            return Freshness::NotModified(meta.clone());
        }
    }

    Freshness::Hit(meta.clone())
}
