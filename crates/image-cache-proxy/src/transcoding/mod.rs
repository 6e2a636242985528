//! Cache decorator that stores originals immediately and converts them to
//! AVIF later, off the request path.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ImageCache;
use crate::config::{CacheConfig, ConversionConfig};
use crate::errors::AppResult;
use crate::imaging::{self, TranscodeSettings};

pub mod pending;

use pending::{Enqueued, PendingState, PendingStore};

#[derive(Debug, Clone)]
pub struct TranscodingOptions {
    /// Distinguishes cache instances in logs and in the pending file name
    pub identifier: String,
    pub state_directory: PathBuf,
    pub min_size: usize,
    pub queue_capacity: Option<usize>,
    pub flush_every: usize,
    pub transcode: TranscodeSettings,
}

impl TranscodingOptions {
    pub fn from_config(cache: &CacheConfig, conversion: &ConversionConfig) -> Self {
        Self {
            identifier: cache.identifier.clone(),
            state_directory: cache.state_directory.clone(),
            min_size: conversion.min_size,
            queue_capacity: conversion.queue_capacity(),
            flush_every: conversion.flush_every,
            transcode: TranscodeSettings::from(conversion),
        }
    }
}

/// What happened to one conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted {
        original_size: usize,
        converted_size: usize,
    },
    Skipped(SkipReason),
    /// Decode, encode or codec task failure. The original stays cached.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    AlreadyAvif,
    /// Size, format or dimension guard
    Guarded(String),
    NotSmaller,
    /// The entry was rewritten while the conversion ran
    Changed,
}

impl ConversionOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, Self::Converted { .. })
    }
}

/// [`ImageCache`] decorator that queues eligible payloads for AVIF conversion.
///
/// Eligible means: at least `min_size` bytes, not a wrapped HTTP response,
/// not already AVIF, and sniffed as JPEG or PNG. Conversions are executed by
/// the scheduler through [`next_job`](Self::next_job) and
/// [`process`](Self::process); `set` never waits for one.
pub struct TranscodingCache {
    inner: Arc<dyn ImageCache>,
    options: TranscodingOptions,
    pending: Mutex<PendingState>,
    store: PendingStore,
    /// Held across snapshot and save so saves land in snapshot order
    flush_lock: Mutex<()>,
    job_ready: Notify,
    batch_active: AtomicBool,
    batch_stop: Mutex<Option<CancellationToken>>,
}

impl TranscodingCache {
    /// Wraps `inner` and restores any pending keys persisted by a previous run.
    pub async fn open(
        inner: Arc<dyn ImageCache>,
        options: TranscodingOptions,
    ) -> AppResult<Arc<Self>> {
        let store = PendingStore::new(&options.state_directory, &options.identifier);
        let restored = store.load().await?;

        let mut state = PendingState::default();
        if !restored.is_empty() {
            info!(
                "AVIF cache [{}]: loaded {} pending conversions",
                options.identifier,
                restored.len()
            );
            state.restore(restored);
        }

        Ok(Arc::new(Self {
            inner,
            options,
            pending: Mutex::new(state),
            store,
            flush_lock: Mutex::new(()),
            job_ready: Notify::new(),
            batch_active: AtomicBool::new(false),
            batch_stop: Mutex::new(None),
        }))
    }

    pub fn identifier(&self) -> &str {
        &self.options.identifier
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().await.is_outstanding(key)
    }

    /// Cheap checks on the bytes just written; no decoding.
    pub fn is_eligible(&self, data: &[u8]) -> bool {
        data.len() >= self.options.min_size
            && !imaging::is_http_response_blob(data)
            && !imaging::is_avif(data)
            && imaging::is_convertible(data)
    }

    async fn enqueue(&self, key: &str) {
        let outcome = self.pending.lock().await.enqueue(
            key,
            self.options.queue_capacity,
            self.options.flush_every,
        );

        match outcome {
            Enqueued::Queued { flush } => {
                debug!(
                    "AVIF cache [{}]: queued {} for conversion",
                    self.options.identifier, key
                );
                self.job_ready.notify_one();
                if flush {
                    self.flush_pending_logged().await;
                }
            }
            Enqueued::QueueFull => {
                debug!(
                    "AVIF cache [{}]: queue full, dropping {}",
                    self.options.identifier, key
                );
            }
            Enqueued::AlreadyPending | Enqueued::Deferred => {}
        }
    }

    /// Pops the next key and marks it in flight.
    pub async fn next_job(&self) -> Option<String> {
        self.pending.lock().await.take_next()
    }

    /// Resolves once a job has been queued since the last wake-up.
    pub async fn job_ready(&self) {
        self.job_ready.notified().await
    }

    /// Converts `key` and clears its in-flight marker.
    pub async fn process(&self, key: &str) -> ConversionOutcome {
        let outcome = self.convert(key).await;
        self.complete(key).await;
        outcome
    }

    /// Clears the in-flight marker for `key` without converting it.
    pub async fn complete(&self, key: &str) {
        if self.pending.lock().await.finish(key) {
            self.job_ready.notify_one();
        }
    }

    /// Releases whatever key is marked in flight. Used when the worker that
    /// held it died; the job is dropped and its original stays cached.
    pub async fn abandon_running(&self) -> Option<String> {
        let mut state = self.pending.lock().await;
        let key = state.running()?.to_string();
        let requeued = state.finish(&key);
        drop(state);

        if requeued {
            self.job_ready.notify_one();
        }
        Some(key)
    }

    async fn convert(&self, key: &str) -> ConversionOutcome {
        let id = &self.options.identifier;

        let Some(original) = self.inner.get(key).await else {
            debug!("AVIF cache [{}]: {} no longer in cache, skipping", id, key);
            return ConversionOutcome::Skipped(SkipReason::Missing);
        };

        if imaging::is_avif(&original) {
            debug!("AVIF cache [{}]: {} already AVIF, skipping", id, key);
            return ConversionOutcome::Skipped(SkipReason::AlreadyAvif);
        }

        let converted =
            match imaging::transcode_to_avif(original.clone(), self.options.transcode).await {
                Ok(converted) => converted,
                Err(e) if e.is_guard() => {
                    debug!("AVIF cache [{}]: skipping {}: {}", id, key, e);
                    return ConversionOutcome::Skipped(SkipReason::Guarded(e.to_string()));
                }
                Err(e) => {
                    warn!("AVIF cache [{}]: conversion of {} failed: {}", id, key, e);
                    return ConversionOutcome::Failed(e.to_string());
                }
            };

        if converted.len() >= original.len() {
            debug!(
                "AVIF cache [{}]: {} not smaller as AVIF ({} -> {} bytes), keeping original",
                id,
                key,
                original.len(),
                converted.len()
            );
            return ConversionOutcome::Skipped(SkipReason::NotSmaller);
        }

        match self.inner.get(key).await {
            Some(current) if current == original => {}
            _ => {
                debug!("AVIF cache [{}]: {} changed during conversion", id, key);
                return ConversionOutcome::Skipped(SkipReason::Changed);
            }
        }

        let original_size = original.len();
        let converted_size = converted.len();
        self.inner.set(key, Bytes::from(converted)).await;

        let savings = 100 - (converted_size * 100 / original_size);
        info!(
            "AVIF [{}]: {} saved {}% ({} -> {} bytes)",
            id, key, savings, original_size, converted_size
        );

        ConversionOutcome::Converted {
            original_size,
            converted_size,
        }
    }

    /// Persists the pending snapshot.
    pub async fn flush_pending(&self) -> AppResult<()> {
        let _flushing = self.flush_lock.lock().await;
        let snapshot = self.pending.lock().await.snapshot();
        self.store.save(&snapshot).await
    }

    async fn flush_pending_logged(&self) {
        if let Err(e) = self.flush_pending().await {
            warn!(
                "AVIF cache [{}]: failed to save pending keys: {}",
                self.options.identifier, e
            );
        }
    }

    /// Claims the batch slot. Returns `None` when a batch is already running
    /// on this instance. The returned run is stopped by `parent` or by
    /// [`stop_processing`](Self::stop_processing).
    pub async fn begin_batch(&self, parent: &CancellationToken) -> Option<BatchRun<'_>> {
        if self
            .batch_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(
                "AVIF cache [{}]: processing already in progress, skipping",
                self.options.identifier
            );
            return None;
        }

        let stop = parent.child_token();
        *self.batch_stop.lock().await = Some(stop.clone());
        Some(BatchRun { cache: self, stop })
    }

    pub fn is_batch_running(&self) -> bool {
        self.batch_active.load(Ordering::Acquire)
    }

    /// Signals a running batch to stop after its current job.
    pub async fn stop_processing(&self) {
        if let Some(stop) = self.batch_stop.lock().await.take() {
            stop.cancel();
        }
    }
}

/// Exclusive claim on an instance's batch slot, released on drop.
pub struct BatchRun<'a> {
    cache: &'a TranscodingCache,
    stop: CancellationToken,
}

impl BatchRun<'_> {
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for BatchRun<'_> {
    fn drop(&mut self) {
        self.cache.batch_active.store(false, Ordering::Release);
    }
}

#[async_trait]
impl ImageCache for TranscodingCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let data = self.inner.get(key).await?;
        debug!(
            "AVIF cache GET {}: {} ({} bytes)",
            key,
            imaging::sniff_content_type(&data),
            data.len()
        );
        Some(data)
    }

    async fn set(&self, key: &str, data: Bytes) {
        self.inner.set(key, data.clone()).await;

        if imaging::is_avif(&data) {
            debug!(
                "AVIF cache [{}]: {} already AVIF, storing as-is",
                self.options.identifier, key
            );
            return;
        }
        if self.is_eligible(&data) {
            self.enqueue(key).await;
        }
    }

    async fn delete(&self, key: &str) {
        self.inner.delete(key).await;
        self.pending.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::imaging::test_images;
    use std::path::Path;

    fn options(state_dir: &Path) -> TranscodingOptions {
        TranscodingOptions {
            identifier: "test".to_string(),
            state_directory: state_dir.to_path_buf(),
            min_size: 5000,
            queue_capacity: None,
            flush_every: 100,
            transcode: TranscodeSettings::default(),
        }
    }

    async fn setup(state_dir: &Path) -> (Arc<MemoryCache>, Arc<TranscodingCache>) {
        let inner = Arc::new(MemoryCache::default());
        let cache = TranscodingCache::open(inner.clone(), options(state_dir))
            .await
            .unwrap();
        (inner, cache)
    }

    fn large_jpeg() -> Bytes {
        let jpeg = test_images::jpeg(256, 256);
        assert!(jpeg.len() >= 5000, "fixture too small: {}", jpeg.len());
        Bytes::from(jpeg)
    }

    #[tokio::test]
    async fn test_small_payloads_never_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = setup(dir.path()).await;

        let small = Bytes::from(test_images::jpeg(8, 8));
        assert!(small.len() < 5000);
        cache.set("small", small.clone()).await;

        assert_eq!(cache.get("small").await, Some(small));
        assert_eq!(cache.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_avif_and_blobs_never_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = setup(dir.path()).await;

        let mut avif = b"\0\0\0\x1cftypavif".to_vec();
        avif.resize(8000, 0);
        let avif = Bytes::from(avif);
        cache.set("avif", avif.clone()).await;
        assert_eq!(cache.get("avif").await, Some(avif));

        let mut blob = b"HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        blob.extend_from_slice(&large_jpeg());
        cache.set("blob", Bytes::from(blob)).await;

        let mut gif = b"GIF89a".to_vec();
        gif.resize(8000, 0);
        cache.set("gif", Bytes::from(gif)).await;

        assert_eq!(cache.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_sets_leave_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = setup(dir.path()).await;
        let jpeg = large_jpeg();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let jpeg = jpeg.clone();
                tokio::spawn(async move { cache.set("same", jpeg).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.pending_count().await, 1);
        assert_eq!(cache.next_job().await.as_deref(), Some("same"));
        assert!(cache.next_job().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_cap_follows_conversion_mode() {
        use crate::config::ConversionMode;

        let dir = tempfile::tempdir().unwrap();
        let jpeg = large_jpeg();
        let mut conversion = ConversionConfig {
            queue_capacity: 2,
            ..ConversionConfig::default()
        };

        for (mode, expected) in [(ConversionMode::Scheduled, 3), (ConversionMode::Continuous, 2)] {
            conversion.mode = mode;
            let cache = CacheConfig {
                identifier: format!("{mode:?}"),
                state_directory: dir.path().to_path_buf(),
                ..CacheConfig::default()
            };
            let transcoding = TranscodingCache::open(
                Arc::new(MemoryCache::default()),
                TranscodingOptions::from_config(&cache, &conversion),
            )
            .await
            .unwrap();

            for key in ["k1", "k2", "k3"] {
                transcoding.set(key, jpeg.clone()).await;
            }
            assert_eq!(transcoding.pending_count().await, expected, "{mode:?}");
            assert_eq!(transcoding.is_pending("k3").await, expected == 3);
        }
    }

    #[tokio::test]
    async fn test_process_converts_and_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let (inner, cache) = setup(dir.path()).await;
        let jpeg = large_jpeg();

        cache.set("photo", jpeg.clone()).await;
        let key = cache.next_job().await.unwrap();
        let outcome = cache.process(&key).await;

        let stored = inner.get("photo").await.unwrap();
        match outcome {
            ConversionOutcome::Converted {
                original_size,
                converted_size,
            } => {
                assert_eq!(original_size, jpeg.len());
                assert_eq!(converted_size, stored.len());
                assert!(imaging::is_avif(&stored));
                assert!(stored.len() < jpeg.len());
            }
            ConversionOutcome::Skipped(SkipReason::NotSmaller) => assert_eq!(stored, jpeg),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!cache.is_pending("photo").await);

        // A second attempt sees AVIF and leaves it alone
        cache.set("photo", stored.clone()).await;
        assert_eq!(cache.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_process_missing_and_changed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (inner, cache) = setup(dir.path()).await;

        cache.set("gone", large_jpeg()).await;
        cache.delete("gone").await;
        assert_eq!(cache.pending_count().await, 0);
        assert_eq!(
            cache.process("gone").await,
            ConversionOutcome::Skipped(SkipReason::Missing)
        );

        // Undecodable bytes that still sniff as JPEG keep the original
        let mut fake = vec![0xFF, 0xD8, 0xFF, 0xE0];
        fake.resize(6000, 0x5A);
        let fake = Bytes::from(fake);
        cache.set("fake", fake.clone()).await;
        let key = cache.next_job().await.unwrap();
        assert!(matches!(
            cache.process(&key).await,
            ConversionOutcome::Failed(_)
        ));
        assert_eq!(inner.get("fake").await, Some(fake));
    }

    #[tokio::test]
    async fn test_set_during_conversion_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = setup(dir.path()).await;

        cache.set("k", large_jpeg()).await;
        let key = cache.next_job().await.unwrap();
        cache.set("k", large_jpeg()).await;
        assert_eq!(cache.pending_count().await, 1);

        cache.complete(&key).await;
        assert_eq!(cache.next_job().await.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_pending_keys_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (inner, cache) = setup(dir.path()).await;

        cache.set("a", large_jpeg()).await;
        cache.set("b", large_jpeg()).await;
        // "a" is interrupted mid-conversion
        assert_eq!(cache.next_job().await.as_deref(), Some("a"));
        cache.flush_pending().await.unwrap();
        drop(cache);

        let reopened = TranscodingCache::open(inner, options(dir.path()))
            .await
            .unwrap();
        assert_eq!(reopened.pending_count().await, 2);
        assert_eq!(reopened.next_job().await.as_deref(), Some("a"));
        assert_eq!(reopened.next_job().await.as_deref(), Some("b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_persist_latest_list() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(MemoryCache::default());
        let cache = TranscodingCache::open(
            inner.clone(),
            TranscodingOptions {
                flush_every: 1,
                ..options(dir.path())
            },
        )
        .await
        .unwrap();
        let jpeg = large_jpeg();

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let cache = cache.clone();
                let jpeg = jpeg.clone();
                tokio::spawn(async move {
                    cache.set(&format!("key-{i}"), jpeg).await;
                    if i % 3 == 0 {
                        cache.flush_pending().await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        drop(cache);

        let reopened = TranscodingCache::open(inner, options(dir.path()))
            .await
            .unwrap();
        assert_eq!(reopened.pending_count().await, 24);
    }

    #[tokio::test]
    async fn test_batch_slot_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = setup(dir.path()).await;
        let shutdown = CancellationToken::new();

        let run = cache.begin_batch(&shutdown).await.unwrap();
        assert!(cache.is_batch_running());
        assert!(cache.begin_batch(&shutdown).await.is_none());

        cache.stop_processing().await;
        assert!(run.is_stopped());

        drop(run);
        assert!(!cache.is_batch_running());
        assert!(cache.begin_batch(&shutdown).await.is_some());
    }
}
