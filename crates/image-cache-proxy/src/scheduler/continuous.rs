//! Single supervised worker that drains a cache's queue as jobs arrive.

use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::defaults::DEFAULT_PROGRESS_LOG_INTERVAL;
use crate::transcoding::TranscodingCache;

pub struct ContinuousWorker {
    cache: Arc<TranscodingCache>,
    throttle: Duration,
}

impl ContinuousWorker {
    pub fn new(cache: Arc<TranscodingCache>, throttle: Duration) -> Self {
        Self { cache, throttle }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.supervise(shutdown))
    }

    /// Runs the drain loop in its own task and restarts it if it panics. The
    /// job that was in flight at the time is dropped; its original stays
    /// cached.
    pub async fn supervise(self, shutdown: CancellationToken) {
        let id = self.cache.identifier().to_string();
        info!("AVIF cache [{}]: continuous conversion worker started", id);

        loop {
            let worker = tokio::spawn(drain(
                self.cache.clone(),
                self.throttle,
                shutdown.clone(),
            ));

            match worker.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    let dropped = self.cache.abandon_running().await;
                    error!(
                        "AVIF cache [{}]: conversion worker panicked (dropped job: {:?}), restarting",
                        id, dropped
                    );
                }
                Err(e) => {
                    error!("AVIF cache [{}]: conversion worker aborted: {}", id, e);
                    break;
                }
            }

            if shutdown.is_cancelled() {
                break;
            }
        }

        if let Err(e) = self.cache.flush_pending().await {
            error!("AVIF cache [{}]: failed to save pending keys: {}", id, e);
        }
        info!("AVIF cache [{}]: continuous conversion worker stopped", id);
    }
}

async fn drain(cache: Arc<TranscodingCache>, throttle: Duration, shutdown: CancellationToken) {
    let mut processed = 0usize;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let key = match cache.next_job().await {
            Some(key) => key,
            None => {
                tokio::select! {
                    _ = cache.job_ready() => {}
                    _ = shutdown.cancelled() => return,
                }
                continue;
            }
        };

        let outcome = cache.process(&key).await;
        debug!(
            "AVIF cache [{}]: {} -> {:?}",
            cache.identifier(),
            key,
            outcome
        );

        if outcome.is_converted() {
            processed += 1;
            if processed % DEFAULT_PROGRESS_LOG_INTERVAL == 0 {
                info!(
                    "AVIF cache [{}]: processed {} images so far...",
                    cache.identifier(),
                    processed
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(throttle) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ImageCache, memory::MemoryCache};
    use crate::imaging::{self, TranscodeSettings, test_images};
    use crate::transcoding::TranscodingOptions;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Panics on the first read of `boom`.
    #[derive(Default)]
    struct FaultyCache {
        inner: MemoryCache,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl ImageCache for FaultyCache {
        async fn get(&self, key: &str) -> Option<Bytes> {
            if key == "boom" && !self.tripped.swap(true, Ordering::SeqCst) {
                panic!("simulated codec crash");
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, data: Bytes) {
            self.inner.set(key, data).await
        }

        async fn delete(&self, key: &str) {
            self.inner.delete(key).await
        }
    }

    async fn open(inner: Arc<dyn ImageCache>, dir: &std::path::Path) -> Arc<TranscodingCache> {
        TranscodingCache::open(
            inner,
            TranscodingOptions {
                identifier: "worker".to_string(),
                state_directory: dir.to_path_buf(),
                min_size: 5000,
                queue_capacity: Some(100),
                flush_every: 100,
                transcode: TranscodeSettings::default(),
            },
        )
        .await
        .unwrap()
    }

    async fn wait_until_idle(cache: &TranscodingCache) {
        for _ in 0..600 {
            if cache.pending_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(MemoryCache::default());
        let cache = open(inner.clone(), dir.path()).await;
        let shutdown = CancellationToken::new();

        let handle = ContinuousWorker::new(cache.clone(), Duration::from_millis(1))
            .spawn(shutdown.clone());

        let jpeg = Bytes::from(test_images::jpeg(200, 200));
        cache.set("one", jpeg.clone()).await;
        cache.set("two", jpeg.clone()).await;
        wait_until_idle(&cache).await;

        for key in ["one", "two"] {
            let stored = inner.get(key).await.unwrap();
            assert!(stored.len() <= jpeg.len());
            assert!(imaging::is_avif(&stored) || stored == jpeg);
        }

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_restarts_after_panic() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(FaultyCache::default());
        let cache = open(inner.clone(), dir.path()).await;
        let shutdown = CancellationToken::new();

        let handle = ContinuousWorker::new(cache.clone(), Duration::from_millis(1))
            .spawn(shutdown.clone());

        let jpeg = Bytes::from(test_images::jpeg(200, 200));
        cache.set("boom", jpeg.clone()).await;
        cache.set("after", jpeg.clone()).await;
        wait_until_idle(&cache).await;

        // The crashed job keeps its original; later jobs still run
        assert_eq!(inner.inner.get("boom").await, Some(jpeg.clone()));
        assert!(!cache.is_pending("after").await);
        assert!(inner.tripped.load(Ordering::SeqCst));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
