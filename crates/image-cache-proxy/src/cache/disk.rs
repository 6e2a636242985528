//! Disk-backed [`ImageCache`] on top of the sandboxed file manager.

use async_trait::async_trait;
use bytes::Bytes;
use sandboxed_file_manager::{CleanupPolicy, SandboxedManager, TimeMatch};
use sha2::{Digest, Sha256};
use std::{path::Path, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ImageCache;
use crate::errors::AppResult;

/// Persistent cache store.
///
/// Keys are hashed with SHA-256 and sharded by the first two hex digits, so
/// arbitrary keys (URLs, `fallback:` paths) map to safe, evenly spread file
/// names. Writes are atomic replacements.
#[derive(Clone, Debug)]
pub struct DiskCache {
    files: SandboxedManager,
}

impl DiskCache {
    pub fn new(files: SandboxedManager) -> Self {
        Self { files }
    }

    /// Opens (or creates) a store rooted at `directory`. A zero `retention`
    /// keeps entries until they are deleted.
    pub async fn open(
        directory: &Path,
        retention: Duration,
        cleanup_interval: Duration,
    ) -> AppResult<Self> {
        let policy = if retention.is_zero() {
            CleanupPolicy::disabled()
        } else {
            CleanupPolicy::new()
                .remove_after(retention)
                .time_match(TimeMatch::LastAccess)
        };

        let files = SandboxedManager::builder()
            .base_directory(directory)
            .cleanup_policy(policy)
            .cleanup_interval(cleanup_interval)
            .build()
            .await?;

        Ok(Self::new(files))
    }

    /// Starts retention cleanup; a no-op when retention is unlimited.
    pub fn spawn_cleanup(&self, shutdown: CancellationToken) {
        self.files.spawn_cleanup_task(shutdown);
    }

    /// Relative on-disk path for `key`: `ab/abcdef…`.
    pub fn key_path(key: &str) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}/{}", &digest[..2], digest)
    }
}

#[async_trait]
impl ImageCache for DiskCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        match self.files.read_optional(Self::key_path(key)).await {
            Ok(data) => data.map(Bytes::from),
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, data: Bytes) {
        if let Err(e) = self.files.write(Self::key_path(key), &data).await {
            warn!("Cache write failed for {} ({} bytes): {}", key, data.len(), e);
        } else {
            debug!("Cached {} ({} bytes)", key, data.len());
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.files.remove_file(Self::key_path(key)).await {
            warn!("Cache delete failed for {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn open_cache(dir: &Path) -> DiskCache {
        DiskCache::open(dir, Duration::ZERO, Duration::from_secs(3600))
            .await
            .unwrap()
    }

    #[test]
    fn test_key_path_is_sharded_hash() {
        let path = DiskCache::key_path("https://example.com/a.jpg");
        let (shard, name) = path.split_once('/').unwrap();
        assert_eq!(shard.len(), 2);
        assert_eq!(name.len(), 64);
        assert!(name.starts_with(shard));
        assert_ne!(path, DiskCache::key_path("https://example.com/b.jpg"));
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path()).await;

        assert!(cache.get("missing").await.is_none());

        cache.set("fallback:/700x/https:/a/b.jpg", Bytes::from_static(b"one")).await;
        assert_eq!(
            cache.get("fallback:/700x/https:/a/b.jpg").await.as_deref(),
            Some(&b"one"[..])
        );

        cache.set("fallback:/700x/https:/a/b.jpg", Bytes::from_static(b"two")).await;
        assert_eq!(
            cache.get("fallback:/700x/https:/a/b.jpg").await.as_deref(),
            Some(&b"two"[..])
        );

        cache.delete("fallback:/700x/https:/a/b.jpg").await;
        assert!(cache.get("fallback:/700x/https:/a/b.jpg").await.is_none());

        // Deleting twice is harmless
        cache.delete("fallback:/700x/https:/a/b.jpg").await;
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        open_cache(dir.path())
            .await
            .set("key", Bytes::from_static(b"durable"))
            .await;

        let reopened = open_cache(dir.path()).await;
        assert_eq!(reopened.get("key").await.as_deref(), Some(&b"durable"[..]));
    }

    #[tokio::test]
    async fn test_concurrent_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open_cache(dir.path()).await);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let key = format!("key-{i}");
                    cache.set(&key, Bytes::from(vec![i as u8; 1024])).await;
                    cache.get(&key).await
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let data = handle.await.unwrap().unwrap();
            assert_eq!(data.len(), 1024);
            assert!(data.iter().all(|b| *b == i as u8));
        }
    }
}
