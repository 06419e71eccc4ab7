//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling
//! handlers to infrastructure concerns. The response cache in
//! [`crate::cache`] is one such layer.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] / [`handler_fn`]: build a [`MiddlewareHandler`] from a
//!   [`Middleware`] or from a terminal async handler.
//! - [`Pipeline`]: an ordered stack that turns a [`Request`] into a [`Response`].

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Request, Response, context::Context};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the next
/// middleware (or returns a fallback `500` response when the chain is exhausted
/// without any middleware generating a response).
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use dogpile::{Response, context::Context, middleware::{Middleware, Next}};
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
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dogpile::cache::{MemoryStore, ResponseCache};
/// use dogpile::middleware::from_middleware;
///
/// let cache = ResponseCache::new(MemoryStore::new());
/// let handler = from_middleware(Arc::new(cache.cache_one_minute()));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps a terminal async handler so it can sit at the end of a middleware
/// stack. The handler never sees [`Next`]; whatever follows it is unreachable.
///
/// # Examples
///
/// ```rust,no_run
/// use dogpile::{Response, StatusCode, middleware::handler_fn};
///
/// let hello = handler_fn(|_ctx| async { Response::new(StatusCode::Ok).body("hello") });
/// ```
pub fn handler_fn<F, Fut>(handler: F) -> MiddlewareHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(
        move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(handler(ctx))
        },
    )
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If no handler remains (i.e. the chain is exhausted without producing a
    /// response), a `500 Internal Server Error` response is returned as a safe
    /// fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(crate::StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared across
///   Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future so it can be awaited across
///   `.await` points in multi-threaded runtimes.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack ending in a terminal handler.
///
/// Cloning a `Pipeline` is cheap; every layer is reference-counted.
///
/// # Examples
///
/// ```rust,no_run
/// use dogpile::{Response, StatusCode, middleware::Pipeline};
/// use dogpile::cache::{MemoryStore, ResponseCache};
///
/// let cache = ResponseCache::new(MemoryStore::new());
/// let pipeline = Pipeline::new()
///     .layer(cache.cache_minutes(5))
///     .handler(|_ctx| async { Response::new(StatusCode::Ok).body("expensive") });
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
}

impl Pipeline {
    /// Creates an empty pipeline. Requests sent through it get the `500`
    /// fallback until a terminal handler is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware layer.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Appends the terminal handler.
    #[must_use]
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.middlewares.push(handler_fn(handler));
        self
    }

    /// Runs `request` through every layer and returns the final response.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(self.middlewares.clone())
            .run(Context::new(request))
            .await
    }
}
