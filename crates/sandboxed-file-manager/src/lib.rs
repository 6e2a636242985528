//! # Sandboxed File Manager
//!
//! Byte storage confined to a single base directory, with atomic replacement
//! and optional retention-based cleanup.
//!
//! Every write goes to a uniquely named temporary file next to its
//! destination and is renamed into place, so a concurrent reader always sees
//! a complete object. Nested relative paths such as `ab/abcdef…` are
//! supported; parent directories are created on demand.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use sandboxed_file_manager::{CleanupPolicy, SandboxedManager, TimeMatch};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SandboxedManager::builder()
//!     .base_directory("/var/cache/images")
//!     .cleanup_policy(
//!         CleanupPolicy::new()
//!             .remove_after(Duration::from_secs(30 * 24 * 60 * 60))
//!             .time_match(TimeMatch::LastAccess),
//!     )
//!     .build()
//!     .await?;
//!
//! manager.write("ab/abcdef", b"bytes").await?;
//! let bytes = manager.read_optional("ab/abcdef").await?;
//! assert_eq!(bytes.as_deref(), Some(&b"bytes"[..]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Path rules
//!
//! - Absolute paths, null bytes and `..` above the root are rejected
//! - `a/b/../c` resolves to `a/c`
//! - Symlinks are followed only when they resolve inside the sandbox

pub mod error;
pub mod manager;
pub mod policy;
pub mod security;

pub use error::{Result, SandboxedFileError};
pub use manager::{SandboxedManager, SandboxedManagerBuilder};
pub use policy::{CleanupPolicy, TimeMatch};
