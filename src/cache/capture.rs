//! The capture protocol.
//!
//! Origins write their response through a [`ResponseSink`]. When a response
//! may be cached, the real sink is wrapped in a [`RecordingSink`] that
//! forwards every call unchanged while keeping a copy of the status,
//! headers, and body. Once the origin is done, [`RecordingSink::into_entry`]
//! yields a [`CacheEntry`] for 200 responses and nothing otherwise.

use std::time::SystemTime;

use bytes::{Bytes, BytesMut};

use super::entry::{CacheEntry, CacheMeta, fmt_http_date, parse_http_date, whole_seconds};
use super::key::normalize_vary;
use crate::http::{Headers, Response, StatusCode};

/// The write side of a response, in the order a handler produces it.
///
/// Headers are final once the first chunk is written or the response is
/// finished; implementations may ignore later header writes.
pub trait ResponseSink: Send {
    fn set_status(&mut self, status: StatusCode);

    /// Appends a header; repeated names are kept.
    fn set_header(&mut self, name: &str, value: &str);

    fn write_chunk(&mut self, chunk: &[u8]);

    /// Marks the response complete. Calling it more than once is harmless.
    fn finish(&mut self);
}

/// A sink that assembles an in-memory [`Response`].
#[derive(Debug)]
pub struct BufferedSink {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    finished: bool,
}

impl Default for BufferedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedSink {
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: BytesMut::new(),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_response(self) -> Response {
        Response::from_parts(self.status, self.headers, self.body.freeze())
    }

    /// Writes `response` through `sink`: status, headers in order, the body
    /// as a single chunk, then finish.
    pub fn replay<S: ResponseSink + ?Sized>(response: Response, sink: &mut S) {
        let (status, headers, body) = response.into_parts();
        sink.set_status(status);
        for (name, value) in headers.iter() {
            sink.set_header(name, value);
        }
        if !body.is_empty() {
            sink.write_chunk(&body);
        }
        sink.finish();
    }
}

impl ResponseSink for BufferedSink {
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    fn write_chunk(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

/// Forwards to an inner sink while recording what passes through.
///
/// # Examples
///
/// ```
/// use rttp_cache::cache::{BufferedSink, RecordingSink, ResponseSink};
///
/// let mut real = BufferedSink::new();
/// let mut recorder = RecordingSink::new(&mut real);
/// recorder.set_header("ETag", "\"abc\"");
/// recorder.write_chunk(b"hel");
/// recorder.write_chunk(b"lo");
/// recorder.finish();
///
/// let entry = recorder.into_entry().expect("200 responses are captured");
/// assert_eq!(entry.body.as_ref(), b"hello");
/// assert_eq!(entry.meta.etag.as_deref(), Some("\"abc\""));
/// assert!(entry.meta.last_modified.is_some());
///
/// let response = real.into_response();
/// assert_eq!(response.body_bytes().as_ref(), b"hello");
/// assert!(response.headers().contains("last-modified"));
/// ```
pub struct RecordingSink<'a, S: ResponseSink + ?Sized> {
    inner: &'a mut S,
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    meta: CacheMeta,
    headers_final: bool,
    finished: bool,
}

impl<'a, S: ResponseSink + ?Sized> RecordingSink<'a, S> {
    pub fn new(inner: &'a mut S) -> Self {
        Self {
            inner,
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: BytesMut::new(),
            meta: CacheMeta::default(),
            headers_final: false,
            finished: false,
        }
    }

    /// Status recorded so far (200 until the origin sets one).
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Normalized names from any `Vary` header the origin declared.
    pub fn declared_vary(&self) -> Option<Vec<String>> {
        self.headers
            .contains("vary")
            .then(|| normalize_vary(self.headers.get_all("vary")))
    }

    /// Completes the response if the origin did not, then returns the
    /// captured entry when the final status is 200.
    pub fn into_entry(mut self) -> Option<CacheEntry> {
        self.finish();
        if self.status != StatusCode::Ok {
            return None;
        }
        Some(CacheEntry {
            headers: self.headers,
            body: Bytes::from(self.body),
            meta: self.meta,
        })
    }

    fn record_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("etag") {
            self.meta.etag = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("last-modified") {
            self.meta.last_modified = parse_http_date(value);
        }
        self.headers.insert(name, value);
    }

    fn finalize_headers(&mut self) {
        if self.headers_final {
            return;
        }
        self.headers_final = true;
        if self.status == StatusCode::Ok && !self.headers.contains("last-modified") {
            let now = fmt_http_date(whole_seconds(SystemTime::now()));
            self.inner.set_header("Last-Modified", &now);
            self.record_header("Last-Modified", &now);
        }
    }
}

impl<S: ResponseSink + ?Sized> ResponseSink for RecordingSink<'_, S> {
    fn set_status(&mut self, status: StatusCode) {
        self.inner.set_status(status);
        if !self.headers_final {
            self.status = status;
        }
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.inner.set_header(name, value);
        self.record_header(name, value);
    }

    fn write_chunk(&mut self, chunk: &[u8]) {
        self.finalize_headers();
        self.inner.write_chunk(chunk);
        self.body.extend_from_slice(chunk);
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finalize_headers();
        self.inner.finish();
        self.finished = true;
    }
}
