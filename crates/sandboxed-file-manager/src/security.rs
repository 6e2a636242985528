//! Path checks that keep every stored object inside the sandbox root.

use crate::error::{Result, SandboxedFileError};
use std::path::{Component, Path, PathBuf};

/// Restricts the sandbox root to the owning user (Unix only).
pub async fn set_secure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|source| SandboxedFileError::Permissions {
                path: path.to_path_buf(),
                source,
            })?;
    }

    #[cfg(not(unix))]
    {
        if !path.exists() {
            return Err(SandboxedFileError::PathValidation {
                path: path.to_path_buf(),
                reason: "Directory does not exist".to_string(),
            });
        }
    }

    Ok(())
}

/// Validates a relative object path and returns it normalised.
///
/// Rejects empty paths, null bytes, absolute paths and any `..` component that
/// would climb above the sandbox root. `.` components are dropped.
pub fn normalize_relative_path(raw: &str) -> Result<PathBuf> {
    let reject = |reason: &str| SandboxedFileError::PathValidation {
        path: PathBuf::from(raw),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(reject("Path cannot be empty"));
    }
    if raw.contains('\0') {
        return Err(reject("Path contains null bytes"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(reject("Path escapes sandbox root"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(reject(
                    "Absolute paths not allowed - use relative paths within sandbox",
                ));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(reject("Path resolves to the sandbox root"));
    }
    Ok(normalized)
}

/// Verifies that an existing path resolves (through symlinks) inside the sandbox.
pub fn validate_path_within_sandbox(resolved_path: &Path, sandbox_base: &Path) -> Result<()> {
    let canonical_base =
        sandbox_base
            .canonicalize()
            .map_err(|e| SandboxedFileError::PathValidation {
                path: sandbox_base.to_path_buf(),
                reason: format!("Failed to resolve sandbox base: {e}"),
            })?;

    // Nothing on disk yet means nothing to follow; the lexical check already ran.
    let Ok(canonical_path) = resolved_path.canonicalize() else {
        return Ok(());
    };

    if !canonical_path.starts_with(&canonical_base) {
        return Err(SandboxedFileError::PathValidation {
            path: resolved_path.to_path_buf(),
            reason: format!(
                "Path escapes sandbox: resolves to '{}' (outside '{}')",
                canonical_path.display(),
                canonical_base.display()
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(
            normalize_relative_path("ab/cdef").unwrap(),
            PathBuf::from("ab/cdef")
        );
        assert_eq!(
            normalize_relative_path("a/b/../c").unwrap(),
            PathBuf::from("a/c")
        );
        assert_eq!(
            normalize_relative_path("./a/./b").unwrap(),
            PathBuf::from("a/b")
        );

        assert!(normalize_relative_path("").is_err());
        assert!(normalize_relative_path("file\0.bin").is_err());
        assert!(normalize_relative_path("/etc/passwd").is_err());
        assert!(normalize_relative_path("../outside").is_err());
        assert!(normalize_relative_path("a/../../outside").is_err());
        assert!(normalize_relative_path("a/..").is_err());
    }

    #[tokio::test]
    async fn test_validate_path_within_sandbox() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();

        let inside = base.join("inside.bin");
        std::fs::write(&inside, b"inside").unwrap();
        assert!(validate_path_within_sandbox(&inside, base).is_ok());

        // Not yet written: nothing to resolve
        assert!(validate_path_within_sandbox(&base.join("missing.bin"), base).is_ok());

        let outside_temp = tempfile::tempdir().unwrap();
        let outside = outside_temp.path().join("outside.bin");
        std::fs::write(&outside, b"outside").unwrap();
        assert!(validate_path_within_sandbox(&outside, base).is_err());
    }
}
