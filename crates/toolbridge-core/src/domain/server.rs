//! Tool server configuration types.
//!
//! A [`ServerConfig`] is what an operator writes. It is untrusted until the
//! security validator in `toolbridge-mcp` turns it into a validated form.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::backoff::BackoffPolicy;
use crate::error::BridgeError;

/// Default number of start attempts before a server is reported failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Where a tool server runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerKind {
    /// Subprocess spawned and supervised by the bridge.
    #[default]
    Local,
    /// Externally managed endpoint the bridge only connects to.
    Remote,
}

/// Wire style used to talk to a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Child stdin/stdout, one JSON message per line.
    #[default]
    Pipe,
    /// HTTP server-sent events for inbound, POST for outbound.
    PushStream,
    /// Stream socket with a 4-byte length prefix per message.
    Socket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => f.pad("pipe"),
            Self::PushStream => f.pad("push-stream"),
            Self::Socket => f.pad("socket"),
        }
    }
}

/// When a stopped server should be started again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    /// Restart after failed health checks or a non-zero exit.
    #[default]
    OnFailure,
    /// Restart after any exit.
    Always,
}

impl RestartPolicy {
    /// Whether a server that stopped should be restarted.
    ///
    /// `failed` is true when the stop followed failed health checks or a
    /// non-zero exit status.
    pub const fn should_restart(self, failed: bool) -> bool {
        match self {
            Self::Never => false,
            Self::OnFailure => failed,
            Self::Always => true,
        }
    }
}

/// Sliding-window request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub const fn new(requests: u32, window: Duration) -> Self {
        Self {
            requests,
            window_secs: window.as_secs(),
        }
    }

    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// A limit that admits at least one request per non-empty window.
    pub const fn is_usable(&self) -> bool {
        self.requests > 0 && self.window_secs > 0
    }
}

/// Opaque credential value.
///
/// The wrapped string is only reachable through [`Secret::expose`]; `Debug`,
/// `Display`, and `Serialize` print a mask instead.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

const SECRET_MASK: &str = "***";

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({SECRET_MASK})")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SECRET_MASK)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(SECRET_MASK)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Configuration for one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name; also the prefix of qualified tool names.
    pub name: String,

    #[serde(default)]
    pub kind: ServerKind,

    #[serde(default)]
    pub transport: TransportKind,

    /// Launcher command line for local servers, e.g. `npx -y @scope/server`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Extra arguments appended after the tokens of `command`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment overrides for the child process. Filtered by the
    /// validator; never merged with the host environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// URL (push-stream) or address (socket) for non-pipe transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Start this server during bridge initialization.
    #[serde(default)]
    pub auto_start: bool,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Start attempts before the server is reported failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-caller budget for calls to this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    /// Result cache lifetime in seconds. Zero disables caching.
    #[serde(default)]
    pub cache_ttl_secs: u64,

    /// Call timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Credentials. Passed as environment variables to local servers and as
    /// request headers to remote ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentication: BTreeMap<String, Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffPolicy>,
}

impl ServerConfig {
    /// A local server speaking over stdin/stdout.
    pub fn pipe(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ServerKind::Local,
            transport: TransportKind::Pipe,
            command: Some(command.into()),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
            endpoint: None,
            auto_start: false,
            restart_policy: RestartPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            rate_limit: None,
            cache_ttl_secs: 0,
            timeout_secs: None,
            authentication: BTreeMap::new(),
            backoff: None,
        }
    }

    /// A remote server reached over `transport` at `endpoint`.
    pub fn remote(
        name: impl Into<String>,
        transport: TransportKind,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            kind: ServerKind::Remote,
            transport,
            command: None,
            endpoint: Some(endpoint.into()),
            ..Self::pipe(name, "")
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    #[must_use]
    pub const fn with_rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitConfig::new(requests, window));
        self
    }

    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.authentication.insert(key.into(), Secret::new(value));
        self
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Structural checks that need no filesystem or security policy.
    ///
    /// Security validation (launcher allow-list, environment filtering, path
    /// checks) happens separately before anything is spawned.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.name.is_empty() {
            return Err(BridgeError::validation("server name is empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BridgeError::validation(format!(
                "server name '{}' may only contain letters, digits, '-' and '_'",
                self.name
            )));
        }

        match (self.kind, self.transport) {
            (ServerKind::Remote, TransportKind::Pipe) => {
                return Err(BridgeError::validation(format!(
                    "server '{}': pipe transport requires a local server",
                    self.name
                )));
            }
            (_, TransportKind::PushStream | TransportKind::Socket)
                if self.endpoint.as_deref().is_none_or(str::is_empty) =>
            {
                return Err(BridgeError::validation(format!(
                    "server '{}': {} transport requires an endpoint",
                    self.name, self.transport
                )));
            }
            _ => {}
        }

        if self.kind == ServerKind::Local && self.command.as_deref().is_none_or(str::is_empty) {
            return Err(BridgeError::validation(format!(
                "server '{}': local servers require a command",
                self.name
            )));
        }

        if let Some(limit) = self.rate_limit {
            if !limit.is_usable() {
                return Err(BridgeError::validation(format!(
                    "server '{}': rate limit needs at least one request per non-empty window",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_masked() {
        let config = ServerConfig::pipe("gh", "npx server").with_secret("GITHUB_TOKEN", "ghp_abc");
        let debug = format!("{config:?}");
        assert!(!debug.contains("ghp_abc"));
        assert!(debug.contains("***"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("ghp_abc"));
        assert_eq!(config.authentication["GITHUB_TOKEN"].expose(), "ghp_abc");
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"name": "fs", "command": "npx -y @modelcontextprotocol/server-filesystem"}"#,
        )
        .unwrap();
        assert_eq!(config.kind, ServerKind::Local);
        assert_eq!(config.transport, TransportKind::Pipe);
        assert_eq!(config.restart_policy, RestartPolicy::OnFailure);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.cache_ttl(), Duration::ZERO);
        assert!(!config.auto_start);
    }

    #[test]
    fn test_deserialize_kebab_case_enums() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"name": "remote", "kind": "remote", "transport": "push-stream",
                "endpoint": "http://localhost:3001/sse", "restart_policy": "never"}"#,
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::PushStream);
        assert_eq!(config.restart_policy, RestartPolicy::Never);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(ServerConfig::pipe("", "node").validate().is_err());
        assert!(ServerConfig::pipe("has space", "node").validate().is_err());
        assert!(ServerConfig::pipe("ok", "").validate().is_err());
        assert!(
            ServerConfig::remote("r", TransportKind::Pipe, "x")
                .validate()
                .is_err()
        );
        assert!(
            ServerConfig::remote("r", TransportKind::Socket, "")
                .validate()
                .is_err()
        );
        assert!(
            ServerConfig::pipe("ok", "node")
                .with_rate_limit(0, Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_restart_policy() {
        assert!(!RestartPolicy::Never.should_restart(true));
        assert!(RestartPolicy::OnFailure.should_restart(true));
        assert!(!RestartPolicy::OnFailure.should_restart(false));
        assert!(RestartPolicy::Always.should_restart(false));
    }
}
