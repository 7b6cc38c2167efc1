//! Bridge settings loaded from the environment.
//!
//! Every knob has a default. Values that fail to parse are logged and the
//! default is kept, so a typo in one variable never prevents startup.
//!
//! Global variables use the `TOOLBRIDGE_` prefix. Per-server overrides use
//! `TOOLBRIDGE_SERVER_<NAME>_<FIELD>`, where `<NAME>` is the server name
//! upper-cased with every non-alphanumeric character replaced by `_`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::domain::{RateLimitConfig, ServerConfig};
use crate::ports::EnvProvider;

/// Prefix shared by every settings variable.
pub const ENV_PREFIX: &str = "TOOLBRIDGE_";

pub const DEFAULT_MAX_CONNECTIONS: usize = 16;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const DEFAULT_CACHE_SWEEP_SECS: u64 = 60;
/// 4 MiB. Larger messages are rejected by every transport.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_CALL_RETRIES: u32 = 2;

/// Process-wide bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// When false, every operation returns `BridgeError::Disabled`.
    pub enabled: bool,

    /// Upper bound on simultaneously open connections.
    pub max_connections: usize,

    /// Call timeout when neither the caller nor the server config sets one.
    pub default_timeout: Duration,

    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,

    /// Bound on spawn plus handshake plus initial tool discovery.
    pub handshake_timeout: Duration,

    /// Time a server gets to exit on its own before signals are sent.
    pub shutdown_grace: Duration,

    pub cache_sweep_interval: Duration,
    pub max_message_bytes: usize,

    /// Retries of a call after connection-class failures.
    pub call_retries: u32,

    /// Default curve for restarts and call retries.
    pub backoff: BackoffPolicy,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BridgeSettings {
    pub const fn with_defaults() -> Self {
        Self {
            enabled: true,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
            health_check_timeout: Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            cache_sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_SECS),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            call_retries: DEFAULT_CALL_RETRIES,
            backoff: BackoffPolicy {
                base_ms: crate::backoff::DEFAULT_BACKOFF_BASE_MS,
                multiplier: crate::backoff::DEFAULT_BACKOFF_MULTIPLIER,
                max_ms: crate::backoff::DEFAULT_BACKOFF_MAX_MS,
            },
        }
    }

    /// Read settings from `env`, keeping defaults for unset or invalid values.
    pub fn from_env(env: &dyn EnvProvider) -> Self {
        let mut settings = Self::with_defaults();
        let reader = EnvReader { env };

        if let Some(enabled) = reader.parse_bool("TOOLBRIDGE_ENABLED") {
            settings.enabled = enabled;
        }
        if let Some(max) = reader.parse_positive::<usize>("TOOLBRIDGE_MAX_CONNECTIONS") {
            settings.max_connections = max;
        }
        if let Some(secs) = reader.parse_positive::<u64>("TOOLBRIDGE_DEFAULT_TIMEOUT_SECS") {
            settings.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = reader.parse_positive::<u64>("TOOLBRIDGE_HEALTH_INTERVAL_SECS") {
            settings.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = reader.parse_positive::<u64>("TOOLBRIDGE_HEALTH_TIMEOUT_SECS") {
            settings.health_check_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = reader.parse_positive::<u64>("TOOLBRIDGE_HANDSHAKE_TIMEOUT_SECS") {
            settings.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = reader.parse_positive::<u64>("TOOLBRIDGE_SHUTDOWN_GRACE_SECS") {
            settings.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = reader.parse_positive::<u64>("TOOLBRIDGE_CACHE_SWEEP_SECS") {
            settings.cache_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(bytes) = reader.parse_positive::<usize>("TOOLBRIDGE_MAX_MESSAGE_BYTES") {
            settings.max_message_bytes = bytes;
        }
        if let Some(retries) = reader.parse::<u32>("TOOLBRIDGE_CALL_RETRIES") {
            settings.call_retries = retries;
        }

        settings
    }
}

/// Environment variable prefix for one server's overrides.
pub fn server_env_prefix(server_name: &str) -> String {
    let name: String = server_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}SERVER_{name}_")
}

/// Apply `TOOLBRIDGE_SERVER_<NAME>_*` overrides to `config` in place.
///
/// Recognized fields: `TIMEOUT_SECS`, `MAX_RETRIES`, `AUTO_START`,
/// `CACHE_TTL_SECS`, and `RATE_LIMIT` (`requests/window_secs`).
pub fn apply_server_overrides(config: &mut ServerConfig, env: &dyn EnvProvider) {
    let prefix = server_env_prefix(&config.name);
    let reader = EnvReader { env };

    if let Some(secs) = reader.parse_positive::<u64>(&format!("{prefix}TIMEOUT_SECS")) {
        config.timeout_secs = Some(secs);
    }
    if let Some(retries) = reader.parse::<u32>(&format!("{prefix}MAX_RETRIES")) {
        config.max_retries = retries;
    }
    if let Some(auto_start) = reader.parse_bool(&format!("{prefix}AUTO_START")) {
        config.auto_start = auto_start;
    }
    if let Some(ttl) = reader.parse::<u64>(&format!("{prefix}CACHE_TTL_SECS")) {
        config.cache_ttl_secs = ttl;
    }

    let key = format!("{prefix}RATE_LIMIT");
    if let Some(raw) = env.get_string(&key) {
        match parse_rate_limit(&raw) {
            Some(limit) => config.rate_limit = Some(limit),
            None => tracing::warn!(
                variable = %key,
                value = %raw,
                "Invalid rate limit (expected requests/window_secs), keeping configured value"
            ),
        }
    }
}

/// Parse `requests/window_secs`, e.g. `10/60`.
pub fn parse_rate_limit(raw: &str) -> Option<RateLimitConfig> {
    let (requests, window) = raw.trim().split_once('/')?;
    let requests: u32 = requests.trim().parse().ok()?;
    let window_secs: u64 = window.trim().parse().ok()?;
    (requests > 0 && window_secs > 0).then_some(RateLimitConfig {
        requests,
        window_secs,
    })
}

struct EnvReader<'a> {
    env: &'a dyn EnvProvider,
}

impl EnvReader<'_> {
    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.env.get_string(key)?;
        let parsed = raw.trim().parse::<T>().ok();
        if parsed.is_none() {
            tracing::warn!(variable = %key, value = %raw, "Invalid setting, using default");
        }
        parsed
    }

    fn parse_positive<T: FromStr + PartialOrd + Default>(&self, key: &str) -> Option<T> {
        let value = self.parse::<T>(key)?;
        if value > T::default() {
            Some(value)
        } else {
            tracing::warn!(variable = %key, "Setting must be positive, using default");
            None
        }
    }

    fn parse_bool(&self, key: &str) -> Option<bool> {
        let raw = self.env.get_string(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                tracing::warn!(variable = %key, value = %raw, "Invalid boolean, using default");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MapEnv;

    #[test]
    fn test_defaults_when_env_empty() {
        let settings = BridgeSettings::from_env(&MapEnv::new());
        assert_eq!(settings, BridgeSettings::with_defaults());
        assert!(settings.enabled);
        assert_eq!(settings.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(settings.backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_reads_global_values() {
        let env = MapEnv::new()
            .with_var("TOOLBRIDGE_ENABLED", "false")
            .with_var("TOOLBRIDGE_MAX_CONNECTIONS", "4")
            .with_var("TOOLBRIDGE_DEFAULT_TIMEOUT_SECS", " 12 ")
            .with_var("TOOLBRIDGE_CALL_RETRIES", "0");
        let settings = BridgeSettings::from_env(&env);
        assert!(!settings.enabled);
        assert_eq!(settings.max_connections, 4);
        assert_eq!(settings.default_timeout, Duration::from_secs(12));
        assert_eq!(settings.call_retries, 0);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let env = MapEnv::new()
            .with_var("TOOLBRIDGE_ENABLED", "maybe")
            .with_var("TOOLBRIDGE_MAX_CONNECTIONS", "0")
            .with_var("TOOLBRIDGE_DEFAULT_TIMEOUT_SECS", "soon");
        let settings = BridgeSettings::from_env(&env);
        assert!(settings.enabled);
        assert_eq!(settings.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(
            settings.default_timeout,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_server_prefix_normalizes_name() {
        assert_eq!(server_env_prefix("git-hub"), "TOOLBRIDGE_SERVER_GIT_HUB_");
    }

    #[test]
    fn test_server_overrides() {
        let env = MapEnv::new()
            .with_var("TOOLBRIDGE_SERVER_WEB_SEARCH_TIMEOUT_SECS", "90")
            .with_var("TOOLBRIDGE_SERVER_WEB_SEARCH_AUTO_START", "yes")
            .with_var("TOOLBRIDGE_SERVER_WEB_SEARCH_RATE_LIMIT", "10/60")
            .with_var("TOOLBRIDGE_SERVER_WEB_SEARCH_MAX_RETRIES", "lots");
        let mut config = ServerConfig::pipe("web-search", "npx web-search");

        apply_server_overrides(&mut config, &env);

        assert_eq!(config.timeout_secs, Some(90));
        assert!(config.auto_start);
        assert_eq!(
            config.rate_limit,
            Some(RateLimitConfig {
                requests: 10,
                window_secs: 60
            })
        );
        assert_eq!(config.max_retries, crate::domain::DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_parse_rate_limit() {
        assert!(parse_rate_limit("5/1").is_some());
        assert!(parse_rate_limit("0/1").is_none());
        assert!(parse_rate_limit("5").is_none());
        assert!(parse_rate_limit("a/b").is_none());
    }
}
