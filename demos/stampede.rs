//! Fires bursts of concurrent requests at a slow cached route and reports how
//! many of them actually reached the handler.
//!
//! ```sh
//! RUST_LOG=dogpile=debug cargo run --example stampede
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dogpile::cache::{CacheEvent, MemoryStore, ResponseCache};
use dogpile::middleware::Pipeline;
use dogpile::{Method, Request, Response, StatusCode};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const BURST: usize = 50;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cache = ResponseCache::new(MemoryStore::new()).refresh_window(Duration::from_secs(2));
    let mut events = cache.subscribe();
    let renders = Arc::new(AtomicUsize::new(0));

    let pipeline = Pipeline::new()
        .layer(cache.cache(Duration::from_secs(3)))
        .handler({
            let renders = renders.clone();
            move |_ctx| {
                let renders = renders.clone();
                async move {
                    let n = renders.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", "text/plain")
                        .body(format!("render #{n}"))
                }
            }
        });

    let hits = Arc::new(AtomicUsize::new(0));
    tokio::spawn({
        let hits = hits.clone();
        async move {
            while let Ok(event) = events.recv().await {
                if let CacheEvent::Hit { .. } = event {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    // Cold burst, warm burst, then a burst after the refresh marker lapses.
    for (round, pause) in [(1, 0), (2, 1), (3, 4)] {
        tokio::time::sleep(Duration::from_secs(pause)).await;
        let before = renders.load(Ordering::SeqCst);

        let mut set = JoinSet::new();
        for _ in 0..BURST {
            let pipeline = pipeline.clone();
            set.spawn(async move { pipeline.handle(request("/report")).await });
        }
        let mut ok = 0;
        while let Some(Ok(res)) = set.join_next().await {
            if res.status() == StatusCode::Ok {
                ok += 1;
            }
        }

        info!(
            round,
            requests = BURST,
            ok,
            renders = renders.load(Ordering::SeqCst) - before,
            hits_so_far = hits.load(Ordering::Relaxed),
            "burst complete"
        );
    }
}

fn request(target: &str) -> Request {
    Request::new(Method::Get, target).with_header("Host", "localhost")
}
