//! Launcher resolution logic.

use std::path::{Path, PathBuf};

use toolbridge_core::EnvProvider;

use super::fs::FsProvider;
use super::types::{Attempt, AttemptOutcome, ResolveError, ResolveResult};
use crate::security::SAFE_PATH;

/// Directories searched after `PATH`.
pub const DEFAULT_SEARCH_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
];

/// Per-user install locations, relative to `HOME`.
const USER_TOOL_DIRS: &[&str] = &[
    ".local/bin",
    ".volta/bin",
    ".asdf/shims",
    ".cargo/bin",
    ".bun/bin",
    ".deno/bin",
];

/// Resolve `command` to an absolute executable path.
///
/// Absolute commands are checked in place. Bare names are searched in, in
/// order: absolute entries of `PATH`, [`DEFAULT_SEARCH_DIRS`], and per-user
/// tool directories under `HOME`. The first executable hit wins.
pub fn resolve_executable(
    command: &str,
    env: &dyn EnvProvider,
    fs: &dyn FsProvider,
) -> Result<ResolveResult, ResolveError> {
    if command.is_empty() {
        return Err(ResolveError::EmptyCommand);
    }

    let mut attempts = Vec::new();
    let mut warnings = Vec::new();

    let command_path = Path::new(command);
    if command_path.is_absolute() {
        let outcome = fs.check_executable(command_path);
        let ok = outcome == AttemptOutcome::Ok;
        attempts.push(Attempt {
            candidate: command_path.to_path_buf(),
            outcome,
        });
        return if ok {
            Ok(ResolveResult {
                resolved_path: command_path.to_path_buf(),
                attempts,
                warnings,
            })
        } else {
            Err(ResolveError::NotResolved {
                command: command.to_string(),
                attempts,
            })
        };
    }

    for dir in candidate_dirs(env, &mut warnings) {
        let candidate = dir.join(command);
        if attempts.iter().any(|a: &Attempt| a.candidate == candidate) {
            continue;
        }
        let outcome = fs.check_executable(&candidate);
        let ok = outcome == AttemptOutcome::Ok;
        attempts.push(Attempt {
            candidate: candidate.clone(),
            outcome,
        });
        if ok {
            return Ok(ResolveResult {
                resolved_path: candidate,
                attempts,
                warnings,
            });
        }
    }

    Err(ResolveError::NotResolved {
        command: command.to_string(),
        attempts,
    })
}

fn candidate_dirs(env: &dyn EnvProvider, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(path_var) = env.get("PATH") {
        for dir in std::env::split_paths(&path_var) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            // Relative entries would resolve against whatever cwd we have.
            if dir.is_relative() {
                warnings.push(format!("skipped relative PATH entry '{}'", dir.display()));
                continue;
            }
            dirs.push(dir);
        }
    }

    dirs.extend(DEFAULT_SEARCH_DIRS.iter().map(PathBuf::from));

    if let Some(home) = env.get("HOME").map(PathBuf::from) {
        if home.is_absolute() {
            dirs.extend(USER_TOOL_DIRS.iter().map(|rel| home.join(rel)));
        }
    }

    dirs
}

/// `PATH` for a child process: the launcher's own directory first (so
/// `npx` finds the `node` installed next to it), then [`SAFE_PATH`].
pub fn effective_child_path(resolved_launcher: &Path) -> String {
    let mut entries: Vec<String> = Vec::new();
    if let Some(dir) = resolved_launcher.parent().and_then(Path::to_str) {
        if !dir.is_empty() && !SAFE_PATH.split(':').any(|safe| safe == dir) {
            entries.push(dir.to_string());
        }
    }
    for entry in SAFE_PATH.split(':') {
        if !entries.iter().any(|e| e == entry) {
            entries.push(entry.to_string());
        }
    }
    entries.join(":")
}
