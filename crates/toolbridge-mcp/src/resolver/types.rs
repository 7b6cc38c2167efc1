//! Types for launcher resolution.

use std::fmt;
use std::path::PathBuf;

use toolbridge_core::BridgeError;

/// A successfully resolved launcher.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    /// Absolute path to the executable.
    pub resolved_path: PathBuf,
    /// Every candidate checked, in order.
    pub attempts: Vec<Attempt>,
    /// Non-fatal notes, e.g. skipped relative `PATH` entries.
    pub warnings: Vec<String>,
}

/// One candidate location and what was found there.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub candidate: PathBuf,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Ok,
    NotFound,
    NotAFile,
    NotExecutable,
    PermissionDenied,
    IoError(String),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::NotFound => write!(f, "not found"),
            Self::NotAFile => write!(f, "not a file"),
            Self::NotExecutable => write!(f, "not executable"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::IoError(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("launcher is empty")]
    EmptyCommand,

    /// Nothing usable was found. `attempts` lists each candidate for logs.
    #[error("could not resolve launcher '{command}'")]
    NotResolved {
        command: String,
        attempts: Vec<Attempt>,
    },
}

impl ResolveError {
    /// One line per checked candidate, for diagnostic logging.
    pub fn attempt_report(&self) -> String {
        match self {
            Self::EmptyCommand => String::new(),
            Self::NotResolved { attempts, .. } if attempts.is_empty() => {
                "(no candidates checked)".to_string()
            }
            Self::NotResolved { attempts, .. } => attempts
                .iter()
                .map(|a| format!("{}: {}", a.candidate.display(), a.outcome))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// Callers only see the launcher name, never the candidate directories.
impl From<ResolveError> for BridgeError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::EmptyCommand => Self::validation("launcher is empty"),
            ResolveError::NotResolved { command, .. } => {
                Self::server(format!("launcher '{command}' is not installed"))
            }
        }
    }
}
