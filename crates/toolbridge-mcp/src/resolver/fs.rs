//! Filesystem provider for launcher resolution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::types::AttemptOutcome;

/// Filesystem checks needed by the resolver.
pub trait FsProvider: Send + Sync {
    /// Whether `path` is an executable regular file.
    fn check_executable(&self, path: &Path) -> AttemptOutcome;
}

/// Real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFs;

impl FsProvider for SystemFs {
    fn check_executable(&self, path: &Path) -> AttemptOutcome {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return AttemptOutcome::NotFound,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return AttemptOutcome::PermissionDenied;
            }
            Err(e) => return AttemptOutcome::IoError(e.to_string()),
        };

        if !metadata.is_file() {
            return AttemptOutcome::NotAFile;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return AttemptOutcome::NotExecutable;
            }
        }

        AttemptOutcome::Ok
    }
}

/// In-memory filesystem with a fixed set of executables.
#[derive(Debug, Clone, Default)]
pub struct FakeFs {
    executables: HashSet<PathBuf>,
    non_executables: HashSet<PathBuf>,
}

impl FakeFs {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_non_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.non_executables.insert(path.into());
        self
    }
}

impl FsProvider for FakeFs {
    fn check_executable(&self, path: &Path) -> AttemptOutcome {
        if self.executables.contains(path) {
            AttemptOutcome::Ok
        } else if self.non_executables.contains(path) {
            AttemptOutcome::NotExecutable
        } else {
            AttemptOutcome::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_fs_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SystemFs.check_executable(dir.path()), AttemptOutcome::NotAFile);
        assert_eq!(
            SystemFs.check_executable(&dir.path().join("missing")),
            AttemptOutcome::NotFound
        );

        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "data").unwrap();
        #[cfg(unix)]
        assert_eq!(SystemFs.check_executable(&file), AttemptOutcome::NotExecutable);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();
            assert_eq!(SystemFs.check_executable(&file), AttemptOutcome::Ok);
        }
    }
}
