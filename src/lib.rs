//! # dogpile
//!
//! Stampede-safe HTTP response caching for async Rust request pipelines.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dogpile::cache::{MemoryStore, ResponseCache};
//! use dogpile::middleware::Pipeline;
//! use dogpile::{Request, Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = ResponseCache::new(MemoryStore::new());
//!     let pipeline = Pipeline::new()
//!         .layer(cache.cache_one_minute())
//!         .handler(|_ctx| async { Response::new(StatusCode::Ok).body("Hello, World!") });
//!
//!     let raw = b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n";
//!     let (request, _) = Request::parse(raw).unwrap();
//!     let response = pipeline.handle(request).await;
//!     assert_eq!(
//!         response.headers().get("cache-control"),
//!         Some("max-age=60, must-revalidate")
//!     );
//! }
//! ```

// ── Request pipeline ─────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;

// ── Response cache ───────────────────────────────────────────────────────────
pub mod cache;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheMiddleware, ResponseCache};
pub use http::{Headers, Method, Request, Response, StatusCode};
