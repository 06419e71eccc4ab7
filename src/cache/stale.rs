//! Refresh markers: the one piece of cross-request coordination.
//!
//! Each entry `key` has a marker at `key.stale`. While the marker exists no
//! new rebuild is admitted. It is written as `Refreshing` (lifetime: the
//! refresh window) when a rebuild is admitted, and overwritten as `Created`
//! (lifetime: the nominal TTL) once the rebuilt entry is stored. When it
//! expires the next request is admitted to rebuild, even if the entry is
//! still in the store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CacheKey, CacheStore, StoreError, TtlPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMarker {
    Created,
    Refreshing,
}

impl RefreshMarker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "1",
            Self::Refreshing => "2",
        }
    }
}

impl fmt::Display for RefreshMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMarker(pub String);

impl FromStr for RefreshMarker {
    type Err = UnknownMarker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::Created),
            "2" => Ok(Self::Refreshing),
            other => Err(UnknownMarker(other.to_owned())),
        }
    }
}

/// Outcome of asking to rebuild an entry whose marker was absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This request wrote the `Refreshing` marker and owns the rebuild.
    Admitted,
    /// Another request wrote the marker first.
    InFlight,
}

/// Reads and writes refresh markers for one route's [`TtlPolicy`].
#[derive(Clone)]
pub struct StaleCoordinator {
    store: Arc<dyn CacheStore>,
    policy: TtlPolicy,
}

impl StaleCoordinator {
    /// Coordinates markers in `store` using the lifetimes of `policy`.
    pub fn new(store: Arc<dyn CacheStore>, policy: TtlPolicy) -> Self {
        Self { store, policy }
    }

    /// Fetches the marker for `key`. An unrecognised value still counts as a
    /// marker, and is reported as `Refreshing`.
    pub async fn marker(&self, key: &CacheKey) -> Result<Option<RefreshMarker>, StoreError> {
        let Some(raw) = self.store.get(&key.stale()).await? else {
            return Ok(None);
        };
        Ok(Some(raw.parse::<RefreshMarker>().unwrap_or_else(|UnknownMarker(value)| {
            warn!(key = %key, value = %value, "unrecognised refresh marker");
            RefreshMarker::Refreshing
        })))
    }

    /// Claims the rebuild of `key` by writing `Refreshing` for the refresh
    /// window, only if no marker exists.
    pub async fn admit(&self, key: &CacheKey) -> Result<Admission, StoreError> {
        let window = self.policy.refresh_window();
        let stored = self
            .store
            .add(&key.stale(), RefreshMarker::Refreshing.to_string(), window)
            .await?;
        if stored {
            debug!(key = %key, window_secs = window.as_secs(), "rebuild admitted");
            Ok(Admission::Admitted)
        } else {
            debug!(key = %key, "rebuild already in flight");
            Ok(Admission::InFlight)
        }
    }

    /// Marks the entry for `key` as built for the nominal TTL.
    pub async fn mark_created(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.store
            .set(
                &key.stale(),
                RefreshMarker::Created.to_string(),
                self.policy.nominal(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, StaleCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let policy = TtlPolicy::new(Duration::from_secs(60));
        let coordinator = StaleCoordinator::new(store.clone(), policy);
        (store, coordinator)
    }

    #[test]
    fn marker_round_trips_through_its_wire_value() {
        for marker in [RefreshMarker::Created, RefreshMarker::Refreshing] {
            assert_eq!(marker.as_str().parse::<RefreshMarker>(), Ok(marker));
        }
        assert!("3".parse::<RefreshMarker>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn first_admission_wins() {
        let (store, coordinator) = setup();
        let key = CacheKey::new("/foo");

        assert_eq!(coordinator.admit(&key).await.unwrap(), Admission::Admitted);
        assert_eq!(coordinator.admit(&key).await.unwrap(), Admission::InFlight);
        assert_eq!(
            coordinator.marker(&key).await.unwrap(),
            Some(RefreshMarker::Refreshing)
        );
        assert_eq!(store.expires_in("/foo.stale"), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn refreshing_marker_lapses_after_window() {
        let (_store, coordinator) = setup();
        let key = CacheKey::new("/foo");

        coordinator.admit(&key).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(coordinator.marker(&key).await.unwrap(), None);
        assert_eq!(coordinator.admit(&key).await.unwrap(), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn created_marker_lives_for_nominal_ttl() {
        let (store, coordinator) = setup();
        let key = CacheKey::new("/foo");

        coordinator.admit(&key).await.unwrap();
        coordinator.mark_created(&key).await.unwrap();

        assert_eq!(
            coordinator.marker(&key).await.unwrap(),
            Some(RefreshMarker::Created)
        );
        assert_eq!(store.expires_in("/foo.stale"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn unknown_marker_value_still_blocks_rebuild() {
        let (store, coordinator) = setup();
        store
            .set("/foo.stale", "true".into(), Duration::from_secs(5))
            .await
            .unwrap();
        let key = CacheKey::new("/foo");
        assert_eq!(
            coordinator.marker(&key).await.unwrap(),
            Some(RefreshMarker::Refreshing)
        );
        assert_eq!(coordinator.admit(&key).await.unwrap(), Admission::InFlight);
    }
}
