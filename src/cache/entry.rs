//! Cache entries and their text encoding in the backend.
//!
//! An inbound entry is stored as three sibling values under one key:
//! `<key>:headers` (JSON pair list), `<key>:body` (base64), and
//! `<key>:meta` (JSON). Readers treat a missing or undecodable `meta` as a
//! miss for the whole entry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::http::Headers;

pub const HEADERS_SUFFIX: &str = "headers";
pub const BODY_SUFFIX: &str = "body";
pub const META_SUFFIX: &str = "meta";

/// Validators remembered alongside a cached response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMeta {
    pub last_modified: Option<SystemTime>,
    pub etag: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredMeta {
    last_modified: Option<u64>,
    etag: Option<String>,
}

impl CacheMeta {
    /// Serializes the meta record. `last_modified` is kept at whole-second
    /// resolution, which is all an HTTP date can carry.
    pub fn encode(&self) -> String {
        let stored = StoredMeta {
            last_modified: self.last_modified.map(unix_secs),
            etag: self.etag.clone(),
        };
        // A struct of an integer and a string always serializes.
        serde_json::to_string(&stored).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let stored: StoredMeta = serde_json::from_str(raw).ok()?;
        Some(Self {
            last_modified: stored
                .last_modified
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            etag: stored.etag,
        })
    }

    /// Seconds elapsed since `last_modified`, clamped at zero. `None` when
    /// the entry carries no last-modified time.
    pub fn age(&self, now: SystemTime) -> Option<u64> {
        self.last_modified.map(|lm| {
            now.duration_since(lm)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
    }
}

/// A complete cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub headers: Headers,
    pub body: Bytes,
    pub meta: CacheMeta,
}

pub fn encode_headers(headers: &Headers) -> String {
    serde_json::to_string(headers).unwrap_or_else(|_| String::from("[]"))
}

pub fn decode_headers(raw: &str) -> Option<Headers> {
    serde_json::from_str(raw).ok()
}

pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

pub fn decode_body(raw: &str) -> Option<Bytes> {
    STANDARD.decode(raw).ok().map(Bytes::from)
}

pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Truncates a timestamp to whole seconds.
pub(crate) fn whole_seconds(t: SystemTime) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(unix_secs(t))
}

pub(crate) fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

pub(crate) fn fmt_http_date(t: SystemTime) -> String {
    httpdate::fmt_http_date(t)
}
