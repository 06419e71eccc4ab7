//! The cache-aside middleware and the factory that configures it.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use super::ttl::{DAY, HOUR, MINUTE, days, hours, minutes};
use super::{
    Admission, CacheConfig, CacheEntry, CacheError, CacheEvent, CacheEvents, CacheKey,
    CacheStore, ResponseCapture, StaleCoordinator, TtlPolicy,
};
use crate::{
    Response,
    context::Context,
    middleware::{Middleware, Next},
};

const CACHE_CONTROL: &str = "Cache-Control";

/// Why the downstream handler is running, recorded in the request
/// [`Extensions`](crate::context::Extensions) before it is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// This request owns the refresh; its response is stored and the
    /// refresh marker set to `Created`.
    Refresh,
    /// Another request owns the refresh and nothing is cached yet; the
    /// response is stored but the marker is left alone.
    Fill,
    /// Caching is disabled or the store failed; nothing is stored.
    Bypass,
}

/// Shared cache configuration; hands out one [`CacheMiddleware`] per route.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use dogpile::cache::{MemoryStore, ResponseCache};
/// use dogpile::middleware::Pipeline;
/// use dogpile::{Response, StatusCode};
///
/// let cache = ResponseCache::new(MemoryStore::new());
/// let mut events = cache.subscribe();
///
/// let reports = Pipeline::new()
///     .layer(cache.cache_hours(2).refresh_window(Duration::from_secs(120)))
///     .handler(|_ctx| async { Response::new(StatusCode::Ok).body("report") });
/// ```
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    events: CacheEvents,
    config: CacheConfig,
}

impl ResponseCache {
    /// Creates a cache over `store` with [`CacheConfig::default`].
    pub fn new<S>(store: S) -> Self
    where
        S: CacheStore + 'static,
    {
        Self::shared(Arc::new(store), CacheConfig::default())
    }

    /// Creates a cache over `store` with explicit settings, typically loaded
    /// through [`CacheConfig::from_json`].
    ///
    /// ```
    /// use dogpile::cache::{CacheConfig, MemoryStore, ResponseCache};
    ///
    /// let config = CacheConfig::from_json(r#"{ "refresh_window_secs": 10 }"#).unwrap();
    /// let cache = ResponseCache::from_config(MemoryStore::new(), config);
    /// assert_eq!(cache.cache_one_minute().policy().storage_ttl().as_secs(), 80);
    /// ```
    pub fn from_config<S>(store: S, config: CacheConfig) -> Self
    where
        S: CacheStore + 'static,
    {
        Self::shared(Arc::new(store), config)
    }

    /// Builds a cache over a store the caller keeps a handle to.
    pub fn shared(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            events: CacheEvents::new(),
            config,
        }
    }

    /// Turns every middleware created afterwards into a pass-through.
    #[must_use]
    pub fn avoid_caching(mut self, avoid: bool) -> Self {
        self.config.avoid_caching = avoid;
        self
    }

    /// Default refresh window for middleware created afterwards.
    #[must_use]
    pub fn refresh_window(mut self, window: Duration) -> Self {
        self.config.refresh_window_secs = window.as_secs();
        self
    }

    /// Whether captured responses are persisted on a spawned task (`true`,
    /// the default) or before the response is handed back.
    #[must_use]
    pub fn detach_writes(mut self, detach: bool) -> Self {
        self.config.detach_writes = detach;
        self
    }

    /// Settings applied to middleware created from here on.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The channel every middleware created by this cache reports to.
    pub fn events(&self) -> &CacheEvents {
        &self.events
    }

    /// Shorthand for `self.events().subscribe()`.
    ///
    /// ```
    /// use dogpile::cache::{MemoryStore, ResponseCache};
    ///
    /// let cache = ResponseCache::new(MemoryStore::new());
    /// let mut events = cache.subscribe();
    /// assert!(events.try_recv().is_err());
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Caches responses for `ttl`. Clients are told `max-age=<ttl>`; the
    /// stored entry lives `ttl` plus two refresh windows.
    ///
    /// ```
    /// use std::time::Duration;
    /// use dogpile::cache::{MemoryStore, ResponseCache};
    ///
    /// let cache = ResponseCache::new(MemoryStore::new());
    /// let route = cache.cache(Duration::from_secs(90));
    /// assert_eq!(route.policy().cache_control(), "max-age=90, must-revalidate");
    /// ```
    pub fn cache(&self, ttl: Duration) -> CacheMiddleware {
        CacheMiddleware {
            store: self.store.clone(),
            events: self.events.clone(),
            policy: TtlPolicy::new(ttl).with_refresh_window(self.config.refresh_window()),
            avoid_caching: self.config.avoid_caching,
            detach_writes: self.config.detach_writes,
        }
    }

    /// Caches responses for `n` minutes.
    pub fn cache_minutes(&self, n: u32) -> CacheMiddleware {
        self.cache(minutes(n))
    }

    /// Caches responses for one minute.
    pub fn cache_one_minute(&self) -> CacheMiddleware {
        self.cache(MINUTE)
    }

    /// Caches responses for `n` hours.
    pub fn cache_hours(&self, n: u32) -> CacheMiddleware {
        self.cache(hours(n))
    }

    /// Caches responses for one hour.
    pub fn cache_hourly(&self) -> CacheMiddleware {
        self.cache(HOUR)
    }

    /// Caches responses for `n` days.
    pub fn cache_days(&self, n: u32) -> CacheMiddleware {
        self.cache(days(n))
    }

    /// Caches responses for one day.
    pub fn cache_daily(&self) -> CacheMiddleware {
        self.cache(DAY)
    }
}

/// Cache-aside middleware for one route.
///
/// Per request:
///
/// 1. With caching disabled, the request passes straight through.
/// 2. The entry and its refresh marker are fetched. A store failure on
///    either is reported and the request passes through uncached.
/// 3. With no marker, this request tries to claim the refresh; if it wins,
///    any stored entry is ignored and the handler rebuilds it.
/// 4. Otherwise a stored entry is replayed without running the handler.
/// 5. Otherwise the handler runs and its response is captured.
///
/// Every response, replayed or not, carries
/// `Cache-Control: max-age=<ttl>, must-revalidate`.
#[derive(Clone)]
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
    events: CacheEvents,
    policy: TtlPolicy,
    avoid_caching: bool,
    detach_writes: bool,
}

impl CacheMiddleware {
    /// Overrides how long an admitted rebuild may run before another
    /// request is admitted.
    #[must_use]
    pub fn refresh_window(mut self, window: Duration) -> Self {
        self.policy = self.policy.with_refresh_window(window);
        self
    }

    /// The lifetimes this route applies.
    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    async fn serve(self, mut ctx: Context, next: Next) -> Response {
        if self.avoid_caching {
            ctx.extensions_mut().insert(CacheStatus::Bypass);
            return next.run(ctx).await;
        }

        let key = CacheKey::from_request(ctx.request());
        let coordinator = StaleCoordinator::new(self.store.clone(), self.policy);

        let mut cached = match self.store.get(key.as_str()).await {
            Ok(cached) => cached,
            Err(source) => {
                self.events.error(CacheError::Fetch { key, source });
                return self.bypass(ctx, next).await;
            }
        };

        let marker = match coordinator.marker(&key).await {
            Ok(marker) => marker,
            Err(source) => {
                self.events.error(CacheError::Fetch { key, source });
                return self.bypass(ctx, next).await;
            }
        };

        let mut owns_refresh = false;
        if marker.is_none() {
            match coordinator.admit(&key).await {
                Ok(Admission::Admitted) => {
                    owns_refresh = true;
                    cached = None;
                }
                Ok(Admission::InFlight) => {}
                Err(source) => {
                    self.events.error(CacheError::Admit {
                        key: key.clone(),
                        source,
                    });
                    owns_refresh = true;
                    cached = None;
                }
            }
        }

        if let Some(raw) = cached {
            match CacheEntry::decode(&key, &raw) {
                Ok(entry) => return self.replay(key, entry),
                Err(err) => self.events.error(err),
            }
        }

        self.rebuild(ctx, next, key, owns_refresh).await
    }

    fn replay(&self, key: CacheKey, entry: CacheEntry) -> Response {
        let mut response = Response::new(entry.status_code);
        response.set_header(CACHE_CONTROL, self.policy.cache_control());
        // Stored headers replace same-named ones, Cache-Control included.
        entry.replay(&mut response);
        self.events.hit(&key, Arc::new(entry));
        response
    }

    async fn rebuild(
        &self,
        mut ctx: Context,
        next: Next,
        key: CacheKey,
        owns_refresh: bool,
    ) -> Response {
        let status = if owns_refresh {
            CacheStatus::Refresh
        } else {
            CacheStatus::Fill
        };
        ctx.extensions_mut().insert(status);

        let capture = ResponseCapture::arm(
            self.store.clone(),
            self.events.clone(),
            key.clone(),
            self.policy,
            owns_refresh,
            self.detach_writes,
        );
        self.events.miss(&key);

        let mut response = next.run(ctx).await;
        response.set_header(CACHE_CONTROL, self.policy.cache_control());
        capture.complete(response).await
    }

    async fn bypass(&self, mut ctx: Context, next: Next) -> Response {
        ctx.extensions_mut().insert(CacheStatus::Bypass);
        let mut response = next.run(ctx).await;
        response.set_header(CACHE_CONTROL, self.policy.cache_control());
        response
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(self.clone().serve(ctx, next))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache::{MemoryStore, RefreshMarker, StoreError};
    use crate::middleware::Pipeline;
    use crate::{Method, Request, StatusCode};

    fn request(target: &str) -> Request {
        Request::new(Method::Get, target)
    }

    fn inline_cache(store: &Arc<MemoryStore>) -> ResponseCache {
        ResponseCache::shared(store.clone(), CacheConfig::default()).detach_writes(false)
    }

    #[test]
    fn duration_builders_set_nominal_ttl() {
        let cache = ResponseCache::new(MemoryStore::new());
        assert_eq!(cache.cache_one_minute().policy().nominal(), MINUTE);
        assert_eq!(cache.cache_minutes(5).policy().nominal(), MINUTE * 5);
        assert_eq!(cache.cache_hourly().policy().nominal(), HOUR);
        assert_eq!(cache.cache_hours(3).policy().nominal(), HOUR * 3);
        assert_eq!(cache.cache_daily().policy().nominal(), DAY);
        assert_eq!(cache.cache_days(7).policy().nominal(), DAY * 7);
    }

    #[test]
    fn refresh_window_overrides_cascade() {
        let cache = ResponseCache::new(MemoryStore::new()).refresh_window(Duration::from_secs(10));
        let route = cache.cache_one_minute();
        assert_eq!(route.policy().storage_ttl(), Duration::from_secs(80));

        let route = route.refresh_window(Duration::from_secs(5));
        assert_eq!(route.policy().storage_ttl(), Duration::from_secs(70));
    }

    #[tokio::test]
    async fn handler_sees_refresh_status_on_first_request() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new()
            .layer(inline_cache(&store).cache_one_minute())
            .handler(|ctx: Context| async move {
                let status = ctx.extensions().get::<CacheStatus>().copied();
                Response::new(StatusCode::Ok).body(format!("{status:?}"))
            });

        let res = pipeline.handle(request("/status")).await;
        assert_eq!(res.body_ref(), b"Some(Refresh)");
    }

    #[tokio::test]
    async fn handler_sees_fill_status_when_refresh_owned_elsewhere() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "/status.stale",
                RefreshMarker::Refreshing.to_string(),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        let pipeline = Pipeline::new()
            .layer(inline_cache(&store).cache_one_minute())
            .handler(|ctx: Context| async move {
                let status = ctx.extensions().get::<CacheStatus>().copied();
                Response::new(StatusCode::Ok).body(format!("{status:?}"))
            });

        let res = pipeline.handle(request("/status")).await;
        assert_eq!(res.body_ref(), b"Some(Fill)");
        // Stored, but the marker still belongs to the other request.
        assert!(store.get("/status").await.unwrap().is_some());
        assert_eq!(
            store.get("/status.stale").await.unwrap().as_deref(),
            Some(RefreshMarker::Refreshing.as_str())
        );
    }

    #[tokio::test]
    async fn corrupt_entry_falls_back_to_rebuild() {
        let store = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(60);
        store.set("/broken", "{not json".into(), ttl).await.unwrap();
        store
            .set("/broken.stale", RefreshMarker::Created.to_string(), ttl)
            .await
            .unwrap();

        let cache = inline_cache(&store);
        let mut rx = cache.subscribe();
        let pipeline = Pipeline::new()
            .layer(cache.cache_one_minute())
            .handler(|_ctx| async { Response::new(StatusCode::Ok).body("fresh") });

        let res = pipeline.handle(request("/broken")).await;
        assert_eq!(res.body_ref(), b"fresh");

        match rx.recv().await.unwrap() {
            CacheEvent::Error(err) => assert!(matches!(*err, CacheError::Corrupt { .. })),
            other => panic!("expected corrupt entry error, got {other:?}"),
        }
        let raw = store.get("/broken").await.unwrap().unwrap();
        assert_eq!(
            CacheEntry::decode(&CacheKey::new("/broken"), &raw)
                .unwrap()
                .body,
            "fresh"
        );
    }

    #[tokio::test]
    async fn stored_cache_control_wins_on_replay() {
        let store = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(60);
        let entry = CacheEntry {
            status_code: StatusCode::Ok,
            body: "old".into(),
            headers: {
                let mut headers = crate::Headers::new();
                headers.insert("Cache-Control", "max-age=5, must-revalidate");
                headers.insert("X-Origin", "stored");
                headers
            },
        };
        let key = CacheKey::new("/pinned");
        store
            .set(key.as_str(), entry.encode(&key).unwrap(), ttl)
            .await
            .unwrap();
        store
            .set("/pinned.stale", RefreshMarker::Created.to_string(), ttl)
            .await
            .unwrap();

        let pipeline = Pipeline::new()
            .layer(inline_cache(&store).cache_one_minute())
            .handler(|_ctx| async { Response::new(StatusCode::Ok).body("new") });

        let res = pipeline.handle(request("/pinned")).await;
        assert_eq!(res.body_ref(), b"old");
        assert_eq!(res.headers().get("x-origin"), Some("stored"));
        assert_eq!(
            res.headers().get("cache-control"),
            Some("max-age=5, must-revalidate")
        );
        assert_eq!(res.headers().get_all("cache-control").count(), 1);
    }

    struct FlakyMarkers(MemoryStore);

    #[async_trait]
    impl CacheStore for FlakyMarkers {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
            self.0.set(key, value, ttl).await
        }

        async fn add(&self, _key: &str, _value: String, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("add refused".into()))
        }
    }

    #[tokio::test]
    async fn failed_admission_still_rebuilds() {
        let cache = ResponseCache::from_config(
            FlakyMarkers(MemoryStore::new()),
            CacheConfig {
                detach_writes: false,
                ..CacheConfig::default()
            },
        );
        let mut rx = cache.subscribe();
        let pipeline = Pipeline::new()
            .layer(cache.cache_one_minute())
            .handler(|_ctx| async { Response::new(StatusCode::Ok).body("built") });

        let res = pipeline.handle(request("/flaky")).await;
        assert_eq!(res.body_ref(), b"built");
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::Error(err) if matches!(*err, CacheError::Admit { .. })
        ));
        assert!(matches!(rx.recv().await.unwrap(), CacheEvent::Miss { .. }));
        assert!(matches!(rx.recv().await.unwrap(), CacheEvent::Cached { .. }));
    }
}
