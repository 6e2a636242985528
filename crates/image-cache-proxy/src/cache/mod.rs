//! Keyed byte store contract shared by the disk store and its decorators.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub mod disk;

pub use disk::DiskCache;

/// A keyed byte cache.
///
/// Implementations never surface errors to callers: a failed read is a miss
/// and a failed write or delete is logged. Once `set` returns the bytes are
/// durable.
#[async_trait]
pub trait ImageCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Bytes>;

    async fn set(&self, key: &str, data: Bytes);

    async fn delete(&self, key: &str);
}

#[async_trait]
impl<T: ImageCache + ?Sized> ImageCache for Arc<T> {
    async fn get(&self, key: &str) -> Option<Bytes> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, data: Bytes) {
        (**self).set(key, data).await
    }

    async fn delete(&self, key: &str) {
        (**self).delete(key).await
    }
}
