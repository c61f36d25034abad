//! Cache key derivation.
//!
//! A key is a namespace prefix followed by the SHA-256 hex digest of the
//! request path and the `name: value` pairs of every header listed in Vary.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::http::Headers;

/// Namespace for inbound response-cache keys.
pub const RESPONSE_NAMESPACE: &str = "response-cache:";

/// Namespace for outbound request-cache keys.
pub const REQUEST_NAMESPACE: &str = "request-cache:";

/// Stands in for a Vary-listed header the request does not carry, so that
/// presence and absence produce different keys.
pub const ABSENT_MARKER: &str = "undefined";

const SEPARATOR: &str = "|";

/// A namespaced cache key. Sub-entries hang off it as `<key>:<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the backend key of the named sub-entry.
    pub fn sub_key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercases, trims, sorts, and de-duplicates Vary header names.
///
/// Accepts any number of raw directive strings (each possibly
/// comma-separated), so `["Accept, Cookie"]` and `["cookie", "ACCEPT"]`
/// normalize identically.
pub fn normalize_vary<I, S>(directives: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = directives
        .into_iter()
        .flat_map(|d| {
            d.as_ref()
                .split(',')
                .map(|n| n.trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        })
        .filter(|n| !n.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Builds deterministic cache keys.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::CacheKeyBuilder;
/// use rttp_cache::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept-Language", "de");
///
/// let a = CacheKeyBuilder::response().build("/docs", ["Accept-Language, Cookie"], &headers);
/// let b = CacheKeyBuilder::response().build("/docs", ["cookie", "accept-language"], &headers);
/// assert_eq!(a, b);
/// assert!(a.as_str().starts_with("response-cache:"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyBuilder {
    namespace: &'static str,
}

impl CacheKeyBuilder {
    /// Builder for inbound response keys.
    pub fn response() -> Self {
        Self {
            namespace: RESPONSE_NAMESPACE,
        }
    }

    /// Builder for outbound request keys.
    pub fn request() -> Self {
        Self {
            namespace: REQUEST_NAMESPACE,
        }
    }

    /// Derives the key for `path` varying on the headers named in `vary`,
    /// looked up in `headers`.
    pub fn build<I, S>(&self, path: &str, vary: I, headers: &Headers) -> CacheKey
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts = vec![path.to_owned()];
        for name in normalize_vary(vary) {
            let value = headers.get(&name).unwrap_or(ABSENT_MARKER);
            parts.push(format!("{name}: {value}"));
        }
        self.digest(&parts.join(SEPARATOR))
    }

    /// Derives the key for an outbound URL.
    pub fn build_url(&self, url: &str) -> CacheKey {
        self.digest(url)
    }

    fn digest(&self, material: &str) -> CacheKey {
        let hash = Sha256::digest(material.as_bytes());
        CacheKey(format!("{}{}", self.namespace, hex::encode(hash)))
    }
}
