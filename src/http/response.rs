//! HTTP response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and in-place
//! mutators for middleware.

use bytes::Bytes;

use super::{Headers, StatusCode};

/// An HTTP response.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("ETag", "\"abc\"")
///     .body("hello");
///
/// assert_eq!(response.headers().get("etag"), Some("\"abc\""));
/// assert_eq!(response.body_bytes().as_ref(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Assembles a response from already-built parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a header in-place, replacing any existing values for the name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes_from(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Splits the response into status, headers, and body.
    pub fn into_parts(self) -> (StatusCode, Headers, Bytes) {
        (self.status, self.headers, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
