//! Security validation for server configurations.
//!
//! Everything here runs before a process is spawned or a socket is opened:
//!
//! - [`validate_command`]: tokenizes the launcher command and enforces the
//!   launcher allow-list and the shell metacharacter ban.
//! - [`sanitize_env`]: builds the child environment from an empty base.
//! - [`validate_path`]: canonicalizes and checks working directories.
//! - [`SecurityValidator`]: runs all of the above for a [`ServerConfig`] and
//!   produces a [`ValidatedServerConfig`].
//!
//! Rejections are reported as `BridgeError::Security` and are never retried.
//!
//! [`ServerConfig`]: toolbridge_core::ServerConfig

mod command;
mod config;
mod env;
mod path;

pub use command::{
    ALLOWED_LAUNCHERS, SHELL_METACHARACTERS, TRUSTED_BIN_DIRS, contains_metacharacter,
    validate_args, validate_command,
};
pub use config::{LaunchSpec, SecurityValidator, ValidatedServerConfig};
pub use env::{
    ALLOWED_ENV_PATTERNS, DENIED_ENV_KEYS, DENIED_ENV_PREFIXES, SAFE_PATH, inject_credentials,
    is_allowed_key, is_denied_key, sanitize_env,
};
pub use path::{FORBIDDEN_ROOTS, validate_path};
