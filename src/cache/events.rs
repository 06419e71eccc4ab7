//! Cache lifecycle signals.
//!
//! Every hit, miss, write and error is logged through `tracing` and
//! broadcast to subscribers. Nothing in the request path waits on, or
//! changes behavior because of, a subscriber.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{CacheEntry, CacheError, CacheKey};

const CHANNEL_CAPACITY: usize = 256;

/// A cache lifecycle signal.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A stored entry was replayed; the handler did not run.
    Hit { key: CacheKey, entry: Arc<CacheEntry> },
    /// The handler ran to build (or pass through) the response.
    Miss { key: CacheKey },
    /// An entry was durably written.
    Cached { key: CacheKey, entry: Arc<CacheEntry> },
    /// A store or payload failure; the request carried on without the cache.
    Error(Arc<CacheError>),
}

/// Fan-out of [`CacheEvent`]s to any number of subscribers.
///
/// Cloning shares the channel. A receiver that falls more than 256 events
/// behind observes `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct CacheEvents {
    tx: broadcast::Sender<CacheEvent>,
}

impl Default for CacheEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Registers a new listener. It receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn hit(&self, key: &CacheKey, entry: Arc<CacheEntry>) {
        debug!(key = %key, status = entry.status_code.as_u16(), "cache hit");
        self.emit(CacheEvent::Hit {
            key: key.clone(),
            entry,
        });
    }

    pub(crate) fn miss(&self, key: &CacheKey) {
        debug!(key = %key, "cache miss");
        self.emit(CacheEvent::Miss { key: key.clone() });
    }

    pub(crate) fn cached(&self, key: &CacheKey, entry: Arc<CacheEntry>, ttl: Duration) {
        debug!(
            key = %key,
            status = entry.status_code.as_u16(),
            ttl_secs = ttl.as_secs(),
            "response cached"
        );
        self.emit(CacheEvent::Cached {
            key: key.clone(),
            entry,
        });
    }

    pub(crate) fn error(&self, error: CacheError) {
        warn!(key = %error.key(), error = %error, "cache error");
        self.emit(CacheEvent::Error(Arc::new(error)));
    }

    fn emit(&self, event: CacheEvent) {
        // Err only means nobody is subscribed.
        let _ = self.tx.send(event);
    }
}
