//! Middleware pipeline.
//!
//! An ordered stack of [`MiddlewareHandler`]s. Each layer receives the
//! [`Context`] and a [`Next`] cursor, and may pass the request on,
//! short-circuit with its own [`Response`], or decorate what comes back.
//! [`ResponseCache`](crate::cache::ResponseCache) plugs in here as a layer
//! that short-circuits on cache hits.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] and [`handler`]: build handlers from a [`Middleware`]
//!   or from a terminal request handler.
//! - [`LoggerMiddleware`]: request/response logger that reports cache outcomes.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::cache::CACHE_STATUS_HEADER;
use crate::context::Context;
use crate::http::{Response, StatusCode};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward
/// a request at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use rttp_cache::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Position of the handler the next `run` call invokes.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::cache::{MemoryStore, ResponseCache};
/// use rttp_cache::middleware::{LoggerMiddleware, from_middleware};
///
/// let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
/// let stack = vec![
///     from_middleware(Arc::new(LoggerMiddleware)),
///     from_middleware(Arc::new(cache)),
/// ];
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps a request handler as the terminal layer of a stack. The handler
/// never sees the rest of the chain.
pub fn handler<F, Fut>(f: F) -> MiddlewareHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(
        move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(f(ctx))
        },
    )
}

impl Next {
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// Falls back to `500 Internal Server Error` when the chain runs out
    /// without any layer producing a response.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementations must be `Send + Sync` because a stack is shared across
/// tasks, and `handle` must return a `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs each request's method, path, status, duration, and cache outcome.
///
/// Emits one `tracing::info!` line after the downstream handler completes:
///
/// ```text
/// GET /docs/foo - 200 (1.2ms) cache=HIT
/// ```
///
/// `cache=-` marks responses that did not pass through a cache.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();
            let cache = response.headers().get(CACHE_STATUS_HEADER).unwrap_or("-");

            tracing::info!("{} {} - {} ({:?}) cache={}", method, path, status, duration, cache);

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Request};

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.add_header("X-Tag", tag);
                response
            })
        }
    }

    fn ok_handler() -> MiddlewareHandler {
        handler(|ctx: Context| async move {
            Response::new(StatusCode::Ok).body(ctx.request().path().to_owned())
        })
    }

    #[tokio::test]
    async fn layers_run_in_order() {
        let stack = vec![
            from_middleware(Arc::new(Tag("outer"))),
            from_middleware(Arc::new(Tag("inner"))),
            ok_handler(),
        ];
        let response = Next::new(stack)
            .run(Context::new(Request::new(Method::Get, "/x")))
            .await;
        assert_eq!(response.body_bytes().as_ref(), b"/x");
        // Inner layers decorate first.
        assert_eq!(
            response.headers().get_all("x-tag").collect::<Vec<_>>(),
            vec!["inner", "outer"]
        );
    }

    #[tokio::test]
    async fn exhausted_chain_is_500() {
        let stack = vec![from_middleware(Arc::new(Tag("only")))];
        let response = Next::new(stack)
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let stack = vec![from_middleware(Arc::new(LoggerMiddleware)), ok_handler()];
        let response = Next::new(stack)
            .run(Context::new(Request::new(Method::Get, "/logged")))
            .await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_bytes().as_ref(), b"/logged");
    }
}
