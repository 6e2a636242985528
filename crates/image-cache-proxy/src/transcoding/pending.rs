//! Pending-conversion bookkeeping and its on-disk snapshot.

use std::{
    collections::{HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::warn;

use crate::errors::AppResult;

static SNAPSHOT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Result of offering a key to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Queued; `flush` is set when the snapshot is due to be persisted
    Queued { flush: bool },
    /// A job for this key is already waiting
    AlreadyPending,
    /// The key is being converted right now and will be retried afterwards
    Deferred,
    /// The queue is at capacity and the key was dropped
    QueueFull,
}

/// Queue of keys awaiting conversion plus the key currently being converted.
///
/// A key is outstanding while it is queued or running, and is never queued
/// twice. A `set` that lands while its key is running marks it for one more
/// attempt once the current one finishes.
#[derive(Debug, Default)]
pub struct PendingState {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    running: Option<String>,
    rerun: bool,
    additions: usize,
}

impl PendingState {
    pub fn enqueue(&mut self, key: &str, capacity: Option<usize>, flush_every: usize) -> Enqueued {
        if self.queued.contains(key) {
            return Enqueued::AlreadyPending;
        }
        if self.running.as_deref() == Some(key) {
            self.rerun = true;
            return Enqueued::Deferred;
        }
        if capacity.is_some_and(|cap| self.queue.len() >= cap) {
            return Enqueued::QueueFull;
        }

        self.queue.push_back(key.to_string());
        self.queued.insert(key.to_string());
        self.additions += 1;

        Enqueued::Queued {
            flush: flush_every > 0 && self.additions % flush_every == 0,
        }
    }

    /// Pops the next key and marks it running.
    pub fn take_next(&mut self) -> Option<String> {
        let key = self.queue.pop_front()?;
        self.queued.remove(&key);
        self.running = Some(key.clone());
        self.rerun = false;
        Some(key)
    }

    /// Clears the running marker. Returns true when the key went back on the
    /// queue because it was written again mid-conversion.
    pub fn finish(&mut self, key: &str) -> bool {
        if self.running.as_deref() != Some(key) {
            return false;
        }
        self.running = None;

        if std::mem::take(&mut self.rerun) && self.queued.insert(key.to_string()) {
            self.queue.push_back(key.to_string());
            return true;
        }
        false
    }

    /// Forgets every trace of `key`.
    pub fn remove(&mut self, key: &str) {
        if self.queued.remove(key) {
            self.queue.retain(|k| k != key);
        }
        if self.running.as_deref() == Some(key) {
            self.rerun = false;
        }
    }

    /// Restores keys loaded from a snapshot, skipping duplicates.
    pub fn restore(&mut self, keys: Vec<String>) {
        for key in keys {
            if self.queued.insert(key.clone()) {
                self.queue.push_back(key);
            }
        }
    }

    /// Everything not yet completed, running key first. A key interrupted
    /// mid-conversion is therefore retried after a restart.
    pub fn snapshot(&self) -> Vec<String> {
        self.running
            .iter()
            .chain(self.queue.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.running.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running(&self) -> Option<&str> {
        self.running.as_deref()
    }

    pub fn is_outstanding(&self, key: &str) -> bool {
        self.queued.contains(key) || self.running.as_deref() == Some(key)
    }
}

/// JSON array of keys at `<state dir>/avif_pending_<identifier>.json`.
#[derive(Debug, Clone)]
pub struct PendingStore {
    path: PathBuf,
}

impl PendingStore {
    pub fn new(state_directory: &Path, identifier: &str) -> Self {
        Self {
            path: state_directory.join(format!("avif_pending_{identifier}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty list. An unreadable one is logged and
    /// treated as empty.
    pub async fn load(&self) -> AppResult<Vec<String>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&data) {
            Ok(keys) => Ok(keys),
            Err(e) => {
                warn!("Failed to parse pending keys in {:?}: {}", self.path, e);
                Ok(Vec::new())
            }
        }
    }

    /// Atomically replaces the snapshot.
    pub async fn save(&self, keys: &[String]) -> AppResult<()> {
        let data = serde_json::to_vec(keys)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            SNAPSHOT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
