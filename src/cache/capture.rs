//! Records the response produced on a rebuild and persists it once complete.

use std::sync::Arc;

use super::{CacheEntry, CacheError, CacheEvents, CacheKey, CacheStore, StaleCoordinator, TtlPolicy};
use crate::Response;

/// Armed before the downstream handler runs; completed with the response it
/// produced.
///
/// The response body is the accumulator: handlers append chunks with
/// [`Response::write`], and the capture snapshots whatever was written once
/// the handler returns. Completion hands the response back untouched. Persisting happens either
/// inline or on a spawned task (`detached`); either way a store failure is
/// reported through [`CacheEvents`] and never reaches the client.
pub struct ResponseCapture {
    writer: EntryWriter,
    detached: bool,
}

/// The owned half of a capture that outlives the request when detached.
struct EntryWriter {
    store: Arc<dyn CacheStore>,
    coordinator: StaleCoordinator,
    events: CacheEvents,
    key: CacheKey,
    policy: TtlPolicy,
    mark_created: bool,
}

impl ResponseCapture {
    /// `mark_created` is false when the rebuild was not admitted: the entry is
    /// stored but the marker stays with the request that owns the refresh.
    pub(crate) fn arm(
        store: Arc<dyn CacheStore>,
        events: CacheEvents,
        key: CacheKey,
        policy: TtlPolicy,
        mark_created: bool,
        detached: bool,
    ) -> Self {
        let coordinator = StaleCoordinator::new(store.clone(), policy);
        Self {
            writer: EntryWriter {
                store,
                coordinator,
                events,
                key,
                policy,
                mark_created,
            },
            detached,
        }
    }

    /// Snapshots the finished `response`, persists it, and returns the
    /// response unchanged.
    pub async fn complete(self, response: Response) -> Response {
        let entry = match CacheEntry::capture(
            &self.writer.key,
            response.status(),
            response.body_ref(),
            response.headers(),
        ) {
            Ok(entry) => entry,
            Err(err) => {
                self.writer.events.error(err);
                return response;
            }
        };

        if self.detached {
            tokio::spawn(self.writer.persist(entry));
        } else {
            self.writer.persist(entry).await;
        }
        response
    }
}

impl EntryWriter {
    // Entry first, marker second: a `Created` marker never points at an
    // entry that was not stored.
    async fn persist(self, entry: CacheEntry) {
        let payload = match entry.encode(&self.key) {
            Ok(payload) => payload,
            Err(err) => {
                self.events.error(err);
                return;
            }
        };

        if let Err(source) = self
            .store
            .set(self.key.as_str(), payload, self.policy.storage_ttl())
            .await
        {
            self.events.error(CacheError::Persist {
                key: self.key,
                source,
            });
            return;
        }

        if self.mark_created {
            if let Err(source) = self.coordinator.mark_created(&self.key).await {
                self.events.error(CacheError::Persist {
                    key: self.key,
                    source,
                });
                return;
            }
        }

        self.events
            .cached(&self.key, Arc::new(entry), self.policy.storage_ttl());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::StatusCode;
    use crate::cache::{CacheEvent, MemoryStore, RefreshMarker};

    fn arm(store: &Arc<MemoryStore>, events: &CacheEvents, mark_created: bool) -> ResponseCapture {
        ResponseCapture::arm(
            store.clone(),
            events.clone(),
            CacheKey::new("/foo"),
            TtlPolicy::new(Duration::from_secs(60)),
            mark_created,
            false,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn persists_chunked_body_then_created_marker() {
        let store = Arc::new(MemoryStore::new());
        let events = CacheEvents::new();
        let mut rx = events.subscribe();

        let mut response = Response::new(StatusCode::Ok).header("X-Origin", "handler");
        response.write("hel");
        response.write("lo");
        let response = arm(&store, &events, true).complete(response).await;

        assert_eq!(response.body_ref(), b"hello");
        let raw = store.get("/foo").await.unwrap().unwrap();
        let entry = CacheEntry::decode(&CacheKey::new("/foo"), &raw).unwrap();
        assert_eq!(entry.status_code, StatusCode::Ok);
        assert_eq!(entry.body, "hello");
        assert_eq!(entry.headers.get("x-origin"), Some("handler"));

        assert_eq!(store.expires_in("/foo"), Some(Duration::from_secs(120)));
        assert_eq!(
            store.get("/foo.stale").await.unwrap().as_deref(),
            Some(RefreshMarker::Created.as_str())
        );
        assert_eq!(store.expires_in("/foo.stale"), Some(Duration::from_secs(60)));

        match rx.recv().await.unwrap() {
            CacheEvent::Cached { key, entry } => {
                assert_eq!(key.as_str(), "/foo");
                assert_eq!(entry.body, "hello");
            }
            other => panic!("expected cached event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unadmitted_capture_leaves_marker_alone() {
        let store = Arc::new(MemoryStore::new());
        let events = CacheEvents::new();

        let response = Response::new(StatusCode::Ok).body("hi");
        arm(&store, &events, false).complete(response).await;

        assert!(store.get("/foo").await.unwrap().is_some());
        assert_eq!(store.get("/foo.stale").await.unwrap(), None);
    }

    #[tokio::test]
    async fn binary_body_is_served_but_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let events = CacheEvents::new();
        let mut rx = events.subscribe();

        let response = Response::new(StatusCode::Ok).body_bytes(vec![0xff, 0x00]);
        let response = arm(&store, &events, true).complete(response).await;

        assert_eq!(response.body_ref(), &[0xff, 0x00]);
        assert!(store.is_empty());
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::Error(err) if matches!(*err, CacheError::NonUtf8Body { .. })
        ));
    }
}
