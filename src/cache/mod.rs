//! Stampede-safe response caching.
//!
//! [`CacheMiddleware`] stores each response (status, headers, body) under its
//! request target and replays it for later requests with the same target.
//! When an entry ages out, a refresh marker in the store admits a single
//! request to rebuild it while the rest keep receiving the stored copy, so
//! an expiring hot page does not send every concurrent request to the
//! handler at once.
//!
//! ## Lifetimes
//!
//! For a route cached for `ttl` with refresh window `w` (default 30s):
//!
//! | Stored item           | Lifetime      |
//! |-----------------------|---------------|
//! | entry (`key`)         | `ttl + 2w`    |
//! | marker `Refreshing`   | `w`           |
//! | marker `Created`      | `ttl`         |
//!
//! ## Failure policy
//!
//! The cache fails open. A store error while reading sends the request
//! straight to the handler; a store error while writing is reported and the
//! already-built response is returned as is. Every failure is logged and
//! broadcast as [`CacheEvent::Error`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use dogpile::cache::{CacheEvent, MemoryStore, ResponseCache};
//! use dogpile::middleware::Pipeline;
//! use dogpile::{Response, StatusCode};
//!
//! # async fn run(request: dogpile::Request) {
//! let cache = ResponseCache::new(MemoryStore::new());
//! let mut events = cache.subscribe();
//!
//! let pipeline = Pipeline::new()
//!     .layer(cache.cache_minutes(10))
//!     .handler(|_ctx| async { Response::new(StatusCode::Ok).body("expensive page") });
//!
//! let response = pipeline.handle(request).await;
//! if let Ok(CacheEvent::Miss { key }) = events.recv().await {
//!     println!("rebuilt {key}");
//! }
//! # }
//! ```

mod capture;
mod config;
mod entry;
mod error;
mod events;
mod key;
mod middleware;
mod stale;
mod store;
pub mod ttl;

pub use capture::ResponseCapture;
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{CacheError, StoreError};
pub use events::{CacheEvent, CacheEvents};
pub use key::CacheKey;
pub use middleware::{CacheMiddleware, CacheStatus, ResponseCache};
pub use stale::{Admission, RefreshMarker, StaleCoordinator, UnknownMarker};
pub use store::{CacheStore, MemoryStore};
pub use ttl::TtlPolicy;
