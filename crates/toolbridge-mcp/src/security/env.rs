//! Child environment construction.
//!
//! Children never inherit the host environment. They get [`SAFE_PATH`], the
//! host `HOME`, and whatever configured overrides survive the filters below.

use std::collections::BTreeMap;

use toolbridge_core::pattern::wildcard_match;
use toolbridge_core::{BridgeError, Secret, SecurityViolation};

use super::command::contains_metacharacter;

/// Minimal `PATH` given to every child.
pub const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Keys that can redirect code loading or shell startup. Any of these in a
/// configuration rejects the whole environment map.
pub const DENIED_ENV_KEYS: &[&str] = &[
    "PATH",
    "HOME",
    "PYTHONPATH",
    "PYTHONHOME",
    "PYTHONSTARTUP",
    "NODE_OPTIONS",
    "NODE_PATH",
    "PERL5LIB",
    "PERL5OPT",
    "RUBYLIB",
    "RUBYOPT",
    "BASH_ENV",
    "ENV",
    "IFS",
    "SHELLOPTS",
    "GCONV_PATH",
];

/// Denied key prefixes (dynamic loader controls).
pub const DENIED_ENV_PREFIXES: &[&str] = &["LD_", "DYLD_"];

/// Keys a configuration may set. `*` is a wildcard.
pub const ALLOWED_ENV_PATTERNS: &[&str] = &[
    "*_API_KEY",
    "*_TOKEN",
    "*_SECRET",
    "*_URL",
    "*_ENDPOINT",
    "*_HOST",
    "*_PORT",
    "*_REGION",
    "*_MODEL",
    "*_LOG_LEVEL",
    "MCP_*",
    "LANG",
    "LC_*",
    "TZ",
    "NO_COLOR",
    "DEBUG",
    "LOG_LEVEL",
    "RUST_LOG",
    "NODE_ENV",
    "PYTHONUNBUFFERED",
    "PYTHONIOENCODING",
];

pub fn is_denied_key(key: &str) -> bool {
    // Compare case-insensitively; Windows treats `Path` and `PATH` as one key.
    let upper = key.to_ascii_uppercase();
    DENIED_ENV_KEYS.contains(&upper.as_str())
        || DENIED_ENV_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub fn is_allowed_key(key: &str) -> bool {
    ALLOWED_ENV_PATTERNS
        .iter()
        .any(|pattern| wildcard_match(pattern, key))
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_entry(key: &str, value: &str) -> Result<(), BridgeError> {
    if !is_valid_key(key) {
        return Err(SecurityViolation::InvalidEnvKey.into());
    }
    if is_denied_key(key) {
        return Err(SecurityViolation::DeniedEnvKey(key.to_string()).into());
    }
    if contains_metacharacter(value) || value.contains('\0') {
        return Err(SecurityViolation::UnsafeEnvValue(key.to_string()).into());
    }
    Ok(())
}

/// Build a child environment from configured overrides.
///
/// A denied key, an invalid key, or an unsafe value anywhere in `custom`
/// rejects the whole map, even if an allow pattern would also match. Keys
/// that pass those checks but match no allow pattern are dropped with a
/// warning.
pub fn sanitize_env(
    custom: &BTreeMap<String, String>,
    home: Option<&str>,
) -> Result<BTreeMap<String, String>, BridgeError> {
    for (key, value) in custom {
        check_entry(key, value)?;
    }

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), SAFE_PATH.to_string());
    if let Some(home) = home.filter(|h| !h.is_empty()) {
        env.insert("HOME".to_string(), home.to_string());
    }

    for (key, value) in custom {
        if is_allowed_key(key) {
            env.insert(key.clone(), value.clone());
        } else {
            tracing::warn!(variable = %key, "Dropping environment variable not on the allow-list");
        }
    }

    Ok(env)
}

/// Add credentials to a sanitized environment.
///
/// Credentials are explicit, so they skip the allow-list, but the deny-list,
/// key syntax, and value checks still apply.
pub fn inject_credentials(
    env: &mut BTreeMap<String, String>,
    credentials: &BTreeMap<String, Secret>,
) -> Result<(), BridgeError> {
    for (key, secret) in credentials {
        check_entry(key, secret.expose())?;
        env.insert(key.clone(), secret.expose().to_string());
    }
    Ok(())
}
