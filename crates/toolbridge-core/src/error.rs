//! Bridge error taxonomy.
//!
//! Every failure that crosses the bridge boundary is a [`BridgeError`]. Each
//! variant maps to an [`ErrorCategory`] so callers can branch without
//! matching message text, and [`BridgeError::user_message`] renders a short
//! explanation that is safe to show to end users.

use std::time::Duration;

use thiserror::Error;

/// Reasons a configuration or request was rejected by the security validator.
///
/// Display strings deliberately omit filesystem paths and credential values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    /// The command string was empty or whitespace only.
    #[error("command is empty")]
    EmptyCommand,

    /// Quotes in the command string do not balance.
    #[error("command has unbalanced quotes")]
    UnbalancedQuotes,

    /// A token contains a shell metacharacter.
    #[error("shell metacharacter in command or arguments")]
    ShellMetacharacter,

    /// The launcher is not on the allow-list.
    #[error("launcher is not on the allow-list")]
    DisallowedLauncher,

    /// An environment key is on the deny-list.
    #[error("environment variable {0} is not permitted")]
    DeniedEnvKey(String),

    /// An environment key is not a valid variable name.
    #[error("environment variable name is invalid")]
    InvalidEnvKey,

    /// An environment value contains shell metacharacters.
    #[error("environment variable {0} has an unsafe value")]
    UnsafeEnvValue(String),

    /// A path resolves inside a protected system location.
    #[error("path points into a protected system location")]
    ForbiddenPath,

    /// A path could not be resolved.
    #[error("path does not exist or cannot be resolved")]
    UnresolvablePath,

    /// A path is not a directory.
    #[error("path is not a directory")]
    NotADirectory,

    /// A path that must be writable is not.
    #[error("path is not writable")]
    NotWritable,
}

/// Errors returned by bridge operations.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Rejected by the security validator. Never retried.
    #[error("security check failed: {0}")]
    Security(#[from] SecurityViolation),

    /// Malformed input, configuration, or wire message.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport or connection failure. The only retryable class.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation did not finish within its deadline.
    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The tool server failed to start or reported a protocol-level failure.
    #[error("server error: {0}")]
    Server(String),

    /// The caller exceeded its request budget.
    #[error("rate limited, retry in {}s", retry_after_secs(.retry_after))]
    RateLimited {
        /// Time until the oldest request leaves the window.
        retry_after: Duration,
    },

    /// No tool with the requested name is known.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The caller's policy does not allow the tool.
    #[error("permission denied for tool {0}")]
    PermissionDenied(String),

    /// The bridge is disabled by configuration.
    #[error("tool bridge is disabled")]
    Disabled,
}

/// Categories of bridge errors for caller-side handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Security,
    Validation,
    Connection,
    Timeout,
    Server,
    RateLimit,
    ToolNotFound,
    Permission,
    Disabled,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn retry_after_secs(retry_after: &Duration) -> u64 {
    // Round up so "retry in 0s" is never shown for a pending window.
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl BridgeError {
    /// Shorthand for [`BridgeError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`BridgeError::Connection`].
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Shorthand for [`BridgeError::Server`].
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server(message.into())
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Security(_) => ErrorCategory::Security,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Connection(_) => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Server(_) => ErrorCategory::Server,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::ToolNotFound(_) => ErrorCategory::ToolNotFound,
            Self::PermissionDenied(_) => ErrorCategory::Permission,
            Self::Disabled => ErrorCategory::Disabled,
        }
    }

    /// Whether a local retry may succeed. Only connection failures qualify.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// A short, actionable message safe to show to end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::Security(v) => format!("The request was blocked: {v}."),
            Self::Validation(m) => format!("The request was invalid: {m}."),
            Self::Connection(_) => {
                "The tool server is unreachable right now. Try again shortly.".to_string()
            }
            Self::Timeout(d) => format!(
                "The tool did not respond within {}s. Try again or raise the timeout.",
                d.as_secs().max(1)
            ),
            Self::Server(_) => "The tool server failed. Check its configuration.".to_string(),
            Self::RateLimited { retry_after } => format!(
                "Rate limited, retry in {}s.",
                retry_after_secs(retry_after)
            ),
            Self::ToolNotFound(name) => format!("No tool named '{name}' is available."),
            Self::PermissionDenied(name) => format!("You are not allowed to use '{name}'."),
            Self::Disabled => "Tool execution is disabled.".to_string(),
        }
    }
}

impl From<&BridgeError> for ErrorCategory {
    fn from(error: &BridgeError) -> Self {
        error.category()
    }
}
