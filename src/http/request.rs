//! HTTP request type.

use super::{Headers, Method};

/// An HTTP request as seen by the cache.
///
/// Only the method, path, and headers take part in caching decisions; the
/// query string is kept for handlers but never enters the cache key.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "/docs/foo?lang=en")
///     .header("If-None-Match", "\"abc\"");
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/docs/foo");
/// assert_eq!(request.query_string(), Some("lang=en"));
/// assert_eq!(request.headers().get("if-none-match"), Some("\"abc\""));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
}

impl Request {
    /// Creates a request with no headers.
    ///
    /// A `?query` suffix on `target` is split off into the query string.
    pub fn new(method: Method, target: impl AsRef<str>) -> Self {
        let (path, query) = split_target(target.as_ref());
        Self {
            method,
            path,
            query,
            headers: Headers::new(),
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}
