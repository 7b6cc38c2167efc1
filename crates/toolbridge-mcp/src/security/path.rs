//! Filesystem path validation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use toolbridge_core::{BridgeError, SecurityViolation};

/// System locations a server may never use as its working directory.
#[cfg(not(windows))]
pub const FORBIDDEN_ROOTS: &[&str] = &[
    "/etc", "/root", "/bin", "/sbin", "/boot", "/usr/bin", "/usr/sbin", "/proc", "/sys", "/dev",
];

#[cfg(windows)]
pub const FORBIDDEN_ROOTS: &[&str] = &[
    r"C:\Windows",
    r"C:\Program Files",
    r"C:\Program Files (x86)",
    r"C:\ProgramData",
];

const WRITE_PROBE: &str = ".toolbridge_write_test";

/// Canonicalize `path` and make sure it is a usable directory outside the
/// protected system roots.
///
/// Canonicalization happens first, so `..` segments and symlinks cannot be
/// used to reach a forbidden root. Roots are compared both as written and
/// canonicalized, which covers platforms where `/etc` is itself a symlink.
pub fn validate_path(path: &Path, require_writable: bool) -> Result<PathBuf, BridgeError> {
    let canonical =
        std::fs::canonicalize(path).map_err(|_| SecurityViolation::UnresolvablePath)?;

    if canonical.parent().is_none() {
        return Err(SecurityViolation::ForbiddenPath.into());
    }

    if is_forbidden(&canonical) {
        tracing::warn!("Rejected path inside a protected system location");
        return Err(SecurityViolation::ForbiddenPath.into());
    }

    if !canonical.is_dir() {
        return Err(SecurityViolation::NotADirectory.into());
    }

    if require_writable {
        verify_writable(&canonical)?;
    }

    Ok(canonical)
}

fn is_forbidden(canonical: &Path) -> bool {
    FORBIDDEN_ROOTS.iter().any(|root| {
        let root = Path::new(root);
        canonical.starts_with(root)
            || std::fs::canonicalize(root).is_ok_and(|resolved| canonical.starts_with(resolved))
    })
}

fn verify_writable(dir: &Path) -> Result<(), BridgeError> {
    let probe = dir.join(format!("{WRITE_PROBE}_{}", std::process::id()));
    let written = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&probe)
        .and_then(|mut file| file.write_all(b"probe"));
    let _ = std::fs::remove_file(&probe);
    written.map_err(|_| SecurityViolation::NotWritable.into())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn violation(path: &Path) -> SecurityViolation {
        match validate_path(path, false) {
            Err(BridgeError::Security(v)) => v,
            other => panic!("expected security error, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_temp_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = validate_path(dir.path(), true).unwrap();
        assert!(resolved.is_absolute());
        // Probe file is cleaned up.
        assert_eq!(std::fs::read_dir(&resolved).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_forbidden_roots() {
        assert_eq!(violation(Path::new("/etc")), SecurityViolation::ForbiddenPath);
        assert_eq!(violation(Path::new("/proc/self")), SecurityViolation::ForbiddenPath);
        assert_eq!(violation(Path::new("/")), SecurityViolation::ForbiddenPath);
    }

    #[test]
    fn test_rejects_traversal_into_forbidden_root() {
        let dir = tempfile::tempdir().unwrap();
        let depth = dir.path().components().count();
        let mut sneaky = dir.path().to_path_buf();
        for _ in 0..depth {
            sneaky.push("..");
        }
        sneaky.push("etc");
        assert_eq!(violation(&sneaky), SecurityViolation::ForbiddenPath);
    }

    #[test]
    fn test_rejects_symlink_into_forbidden_root() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("innocent");
        std::os::unix::fs::symlink("/etc", &link).unwrap();
        assert_eq!(violation(&link), SecurityViolation::ForbiddenPath);
    }

    #[test]
    fn test_rejects_missing_and_non_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            violation(&dir.path().join("missing")),
            SecurityViolation::UnresolvablePath
        );

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(violation(&file), SecurityViolation::NotADirectory);
    }

    #[test]
    fn test_error_does_not_echo_path() {
        let err = validate_path(Path::new("/etc"), false).unwrap_err();
        assert!(!err.to_string().contains("/etc"));
    }
}
