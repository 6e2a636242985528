//! Error types for the sandboxed store.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SandboxedFileError>;

#[derive(Debug, thiserror::Error)]
pub enum SandboxedFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A relative path was rejected or resolved outside the base directory
    #[error("Rejected path {path:?}: {reason}")]
    PathValidation { path: PathBuf, reason: String },

    /// The temp file could not be renamed over the destination
    #[error("Could not replace {path:?}: {source}")]
    AtomicReplace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not restrict permissions on {path:?}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store builder is missing a base directory")]
    MissingBaseDirectory,
}

impl SandboxedFileError {
    /// True when the underlying cause is a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
