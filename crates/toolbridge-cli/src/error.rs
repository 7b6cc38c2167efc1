//! CLI-specific error types and exit codes.

use thiserror::Error;
use toolbridge_core::{BridgeError, ErrorCategory};

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// A bridge operation failed.
    #[error("{}", .0.user_message())]
    Bridge(#[from] BridgeError),

    /// Argument parsing error.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tool ran but reported an error.
    #[error("Tool error: {0}")]
    Tool(String),
}

impl CliError {
    /// Map error to an exit code (sysexits.h where one fits).
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Bridge(e) => match e.category() {
                ErrorCategory::Security | ErrorCategory::Permission => 77, // EX_NOPERM
                ErrorCategory::Validation | ErrorCategory::ToolNotFound => 65, // EX_DATAERR
                ErrorCategory::Connection | ErrorCategory::Server => 69, // EX_UNAVAILABLE
                ErrorCategory::Timeout | ErrorCategory::RateLimit => 75, // EX_TEMPFAIL
                ErrorCategory::Disabled => 78,                           // EX_CONFIG
            },
            Self::Arguments(_) => 2,
            Self::Config(_) => 78,
            Self::Tool(_) => 1,
        }
    }
}
