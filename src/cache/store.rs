//! The key-value store the cache reads and writes.
//!
//! [`CacheStore`] is the seam to an external store (memcached, redis, ...).
//! [`MemoryStore`] is an in-process implementation for tests, demos and
//! single-node deployments.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::StoreError;

/// A key-value store with per-key expiry.
///
/// Values are opaque strings. Implementations must treat an expired key as
/// absent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` at `key`, replacing any previous value, expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Stores `value` only if `key` is absent. Returns `true` if it was stored.
    ///
    /// The default is a `get` followed by a `set`; two callers racing between
    /// those calls can both see `true`. Stores with a native set-if-absent
    /// (memcached `add`, redis `SET NX`) should override this.
    async fn add(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }
}

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Instant,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Slots {
    map: HashMap<String, Slot>,
    next_sweep: Instant,
}

impl Slots {
    fn insert(&mut self, key: &str, value: String, expires_at: Instant, now: Instant) {
        // The only place slots of keys that are never read again get reclaimed.
        if now >= self.next_sweep {
            let before = self.map.len();
            self.map.retain(|_, slot| slot.expires_at > now);
            let swept = before - self.map.len();
            if swept > 0 {
                trace!(swept, live = self.map.len(), "swept expired slots");
            }
            self.next_sweep = now + SWEEP_INTERVAL;
        }
        self.map
            .insert(key.to_owned(), Slot { value, expires_at });
    }
}

/// In-process [`CacheStore`] with atomic `add`.
///
/// Expiry is measured on the tokio clock, so a paused test runtime controls
/// it with `tokio::time::advance`. Expired slots are dropped when read, and
/// writes sweep the whole map at most once per second.
///
/// ```
/// use std::time::Duration;
/// use dogpile::cache::{CacheStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.set("/foo", "cached".into(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("/foo").await.unwrap().as_deref(), Some("cached"));
/// assert!(!store.add("/foo", "other".into(), Duration::from_secs(60)).await.unwrap());
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    slots: Mutex<Slots>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL,
            }),
        }
    }

    /// Remaining lifetime of `key`, or `None` if absent or expired.
    pub fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock("expires_in")
            .map
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.expires_at - now)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock("len")
            .map
            .values()
            .filter(|slot| slot.expires_at > now)
            .count()
    }

    /// Returns `true` if no key is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, Slots> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(op, "recovered from poisoned memory store lock");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut slots = self.lock("get");
        match slots.map.get(key) {
            Some(slot) if slot.expires_at > now => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        self.lock("set").insert(key, value, now + ttl, now);
        Ok(())
    }

    async fn add(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut slots = self.lock("add");
        if slots.map.get(key).is_some_and(|slot| slot.expires_at > now) {
            return Ok(false);
        }
        slots.insert(key, value, now + ttl, now);
        Ok(true)
    }
}
