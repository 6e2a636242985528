use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::transcoding::TranscodingCache;

/// The transcoding caches a batch run walks over. Cloning shares the list.
#[derive(Clone, Default)]
pub struct TranscoderRegistry {
    caches: Arc<RwLock<Vec<Arc<TranscodingCache>>>>,
}

impl TranscoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, cache: Arc<TranscodingCache>) {
        self.caches.write().await.push(cache);
    }

    pub async fn caches(&self) -> Vec<Arc<TranscodingCache>> {
        self.caches.read().await.clone()
    }

    /// `(identifier, pending)` for every registered cache.
    pub async fn pending_counts(&self) -> Vec<(String, usize)> {
        let mut counts = Vec::new();
        for cache in self.caches().await {
            counts.push((cache.identifier().to_string(), cache.pending_count().await));
        }
        counts
    }

    pub async fn total_pending(&self) -> usize {
        self.pending_counts().await.iter().map(|(_, n)| n).sum()
    }

    pub async fn stop_all(&self) {
        for cache in self.caches().await {
            cache.stop_processing().await;
        }
    }

    pub async fn flush_all(&self) {
        for cache in self.caches().await {
            if let Err(e) = cache.flush_pending().await {
                warn!(
                    "AVIF cache [{}]: failed to save pending keys: {}",
                    cache.identifier(),
                    e
                );
            }
        }
    }
}
