//! Core sandboxed file manager implementation.

use crate::{
    error::{Result, SandboxedFileError},
    policy::CleanupPolicy,
    security::{normalize_relative_path, set_secure_permissions, validate_path_within_sandbox},
};

use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock, time::interval};
use tokio_util::sync::CancellationToken;

const TEMP_SUFFIX: &str = ".partial";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Access bookkeeping for one stored object, kept only while a retention
/// policy is active.
#[derive(Debug, Clone)]
struct FileInfo {
    id: String,
    file_path: PathBuf,
    modified: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

/// Sandboxed object store rooted at a single directory.
///
/// Writes land in a uniquely named temporary sibling and are renamed over the
/// destination, so concurrent readers see either the previous or the new
/// contents in full. With retention disabled nothing is tracked in memory and
/// operations on different paths share no lock at all. With retention enabled
/// a short registry update follows the I/O.
#[derive(Clone, Debug)]
pub struct SandboxedManager {
    base_dir: PathBuf,
    file_registry: Arc<RwLock<HashMap<String, FileInfo>>>,
    cleanup_policy: CleanupPolicy,
    cleanup_interval: Duration,
}

impl SandboxedManager {
    #[must_use]
    pub fn builder() -> SandboxedManagerBuilder {
        SandboxedManagerBuilder::new()
    }

    /// Access times are only recorded when something will expire on them.
    fn tracks_access(&self) -> bool {
        !self.cleanup_policy.is_infinite()
    }

    /// Atomically replaces the contents at `path`.
    ///
    /// # Errors
    /// Returns an error if the path is invalid, escapes the sandbox, or the
    /// temporary file cannot be written or renamed into place.
    pub async fn write<P: AsRef<str>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> Result<()> {
        let (id, file_path) = self.validate_and_get_path(path.as_ref())?;
        let contents = contents.as_ref();

        let temp_path = temp_sibling(&file_path);
        if let Err(e) = write_and_sync(&temp_path, contents).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(source) = fs::rename(&temp_path, &file_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(SandboxedFileError::AtomicReplace {
                path: file_path,
                source,
            });
        }

        if self.tracks_access() {
            let now = Utc::now();
            self.file_registry.write().await.insert(
                id.clone(),
                FileInfo {
                    id,
                    file_path,
                    modified: now,
                    last_accessed: now,
                },
            );
        }

        Ok(())
    }

    /// Reads the whole object at `path`.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or the file cannot be read;
    /// a missing file surfaces as an I/O `NotFound`.
    pub async fn read<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        let (id, file_path) = self.validate_and_get_path(path.as_ref())?;

        let content = fs::read(&file_path).await?;
        if self.tracks_access()
            && let Some(file_info) = self.file_registry.write().await.get_mut(&id)
        {
            file_info.last_accessed = Utc::now();
        }
        Ok(content)
    }

    /// Like [`read`](Self::read) but maps a missing file to `None`.
    ///
    /// # Errors
    /// Returns an error for invalid paths and I/O failures other than `NotFound`.
    pub async fn read_optional<P: AsRef<str>>(&self, path: P) -> Result<Option<Vec<u8>>> {
        match self.read(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Removes the object at `path`. Returns whether anything was removed.
    ///
    /// # Errors
    /// Returns an error for invalid paths and I/O failures other than `NotFound`.
    pub async fn remove_file<P: AsRef<str>>(&self, path: P) -> Result<bool> {
        let (id, file_path) = self.validate_and_get_path(path.as_ref())?;

        let removed = match fs::remove_file(&file_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if self.tracks_access() {
            self.file_registry.write().await.remove(&id);
        }
        Ok(removed)
    }

    /// Removes every object the retention policy considers expired.
    ///
    /// Candidates are chosen from a registry snapshot, so the write lock is
    /// only held while the registry entries are dropped.
    ///
    /// # Errors
    /// Currently infallible; individual removal failures are logged.
    pub async fn cleanup_expired_files(&self) -> Result<usize> {
        if self.cleanup_policy.is_infinite() {
            return Ok(0);
        }

        let snapshot: Vec<FileInfo> = self.file_registry.read().await.values().cloned().collect();

        let mut removed = 0;
        let mut forgotten = Vec::new();
        for info in snapshot {
            let modified = match fs::metadata(&info.file_path).await {
                Ok(meta) => meta.modified().map(DateTime::from).unwrap_or(info.modified),
                Err(_) => {
                    forgotten.push(info.id);
                    continue;
                }
            };

            if !self.cleanup_policy.should_cleanup(info.last_accessed, modified) {
                continue;
            }

            match fs::remove_file(&info.file_path).await {
                Ok(()) => {
                    tracing::debug!("Removed expired file: {}", info.id);
                    removed += 1;
                    forgotten.push(info.id);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove expired file {:?}: {}", info.file_path, e);
                }
            }
        }

        if !forgotten.is_empty() {
            let mut registry = self.file_registry.write().await;
            for id in forgotten {
                registry.remove(&id);
            }
        }

        if removed > 0 {
            tracing::info!("Cleaned up {} expired files", removed);
        }
        Ok(removed)
    }

    /// Runs [`cleanup_expired_files`](Self::cleanup_expired_files) on the
    /// configured interval until `shutdown` fires.
    pub fn spawn_cleanup_task(&self, shutdown: CancellationToken) {
        if self.cleanup_policy.is_infinite() || self.cleanup_interval.is_zero() {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(manager.cleanup_interval);
            // The first tick fires immediately; skip it so startup stays quiet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.cleanup_expired_files().await {
                            tracing::error!("Error during file cleanup: {}", e);
                        }
                    }
                    () = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Walks the sandbox and registers every object already on disk so the
    /// retention policy covers it. Leftover temporary files from an
    /// interrupted write are removed.
    async fn load_existing_files(&self) -> Result<()> {
        let mut pending_dirs = vec![self.base_dir.clone()];
        let mut loaded = HashMap::new();
        let mut stale_temps = 0usize;

        while let Some(dir) = pending_dirs.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    pending_dirs.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
                {
                    let _ = fs::remove_file(&path).await;
                    stale_temps += 1;
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.base_dir) else {
                    continue;
                };
                let id = registry_key(relative);
                let metadata = entry.metadata().await?;
                let modified = DateTime::from(metadata.modified().unwrap_or(std::time::UNIX_EPOCH));

                loaded.insert(
                    id.clone(),
                    FileInfo {
                        id,
                        file_path: path,
                        modified,
                        last_accessed: modified,
                    },
                );
            }
        }

        if stale_temps > 0 {
            tracing::debug!("Removed {} interrupted writes", stale_temps);
        }
        if !loaded.is_empty() {
            tracing::info!("Loaded {} existing files from disk", loaded.len());
        }
        self.file_registry.write().await.extend(loaded);
        Ok(())
    }

    /// Normalises `filepath`, creates its parent directories and returns the
    /// registry key together with the absolute path inside the sandbox.
    fn validate_and_get_path(&self, filepath: &str) -> Result<(String, PathBuf)> {
        let relative = normalize_relative_path(filepath)?;
        let full_path = self.base_dir.join(&relative);

        if let Some(parent) = full_path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| SandboxedFileError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        validate_path_within_sandbox(&full_path, &self.base_dir)?;

        tracing::trace!("Path validated: '{}' -> '{}'", filepath, full_path.display());

        Ok((registry_key(&relative), full_path))
    }
}

fn registry_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{file_name}.{}.{unique}{TEMP_SUFFIX}",
        std::process::id()
    ))
}

async fn write_and_sync(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// Builder for configuring a `SandboxedManager`.
pub struct SandboxedManagerBuilder {
    base_directory: Option<PathBuf>,
    cleanup_policy: CleanupPolicy,
    cleanup_interval: Option<Duration>,
}

impl SandboxedManagerBuilder {
    fn new() -> Self {
        Self {
            base_directory: None,
            cleanup_policy: CleanupPolicy::disabled(),
            cleanup_interval: None,
        }
    }

    #[must_use]
    pub fn base_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base_directory = Some(path.into());
        self
    }

    #[must_use]
    pub fn cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// Defaults to the policy's recommended interval when unset.
    #[must_use]
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// # Errors
    /// Returns an error if:
    /// - Base directory is not set
    /// - Base directory cannot be created or secured
    /// - Existing files cannot be enumerated (retention enabled only)
    pub async fn build(self) -> Result<SandboxedManager> {
        let base_dir = self
            .base_directory
            .ok_or(SandboxedFileError::MissingBaseDirectory)?;

        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| SandboxedFileError::CreateDir {
                path: base_dir.clone(),
                source: e,
            })?;
        set_secure_permissions(&base_dir).await?;

        let cleanup_interval = self
            .cleanup_interval
            .unwrap_or_else(|| self.cleanup_policy.recommended_cleanup_interval());

        let manager = SandboxedManager {
            base_dir,
            file_registry: Arc::new(RwLock::new(HashMap::new())),
            cleanup_policy: self.cleanup_policy,
            cleanup_interval,
        };

        if manager.tracks_access() {
            manager.load_existing_files().await?;
        }

        tracing::info!(
            "SandboxedManager initialized - base_dir: {:?}, cleanup_interval: {:?}, cleanup_enabled: {}",
            manager.base_dir,
            manager.cleanup_interval,
            !manager.cleanup_policy.is_infinite()
        );

        Ok(manager)
    }
}
