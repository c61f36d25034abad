//! # rttp-cache
//!
//! HTTP-semantics-aware caching for `rttp`-style request handlers.
//!
//! [`cache::ResponseCache`] serves `GET` and `HEAD` requests from a key-value
//! backend, honouring `Cache-Control`, `If-None-Match`, and
//! `If-Modified-Since`, and stores fresh 200 responses as the handler
//! produces them. [`cache::ConditionalFetcher`] does the same for outbound
//! requests with conditional GETs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rttp_cache::cache::{CacheConfig, ResponseCache};
//! use rttp_cache::context::Context;
//! use rttp_cache::http::{Method, Request, Response, StatusCode};
//! use rttp_cache::middleware::{LoggerMiddleware, Next, from_middleware, handler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::new().max_age(300).vary("Accept-Language");
//!     let cache = ResponseCache::from_config(&config).await?;
//!
//!     let stack = vec![
//!         from_middleware(Arc::new(LoggerMiddleware)),
//!         from_middleware(Arc::new(cache)),
//!         handler(|_ctx: Context| async {
//!             Response::new(StatusCode::Ok).body("Hello, World!")
//!         }),
//!     ];
//!
//!     let request = Request::new(Method::Get, "/");
//!     let response = Next::new(stack).run(Context::new(request)).await;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;

pub use http::{Headers, Method, Request, Response, StatusCode};
