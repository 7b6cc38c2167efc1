//! Tool, result, and status types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between server and tool in qualified names (`server:tool`).
pub const QUALIFIED_SEPARATOR: char = ':';

/// A tool exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name, unique within its server.
    pub name: String,

    /// Name of the server that provides this tool.
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl Tool {
    pub fn new(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            description: None,
            input_schema: empty_object_schema(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// `server:tool`, the name callers use to address this tool.
    pub fn qualified_name(&self) -> String {
        format!("{}{QUALIFIED_SEPARATOR}{}", self.server, self.name)
    }
}

/// Split `server:tool` into its parts. Returns `None` for unqualified names.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    let (server, tool) = name.split_once(QUALIFIED_SEPARATOR)?;
    (!server.is_empty() && !tool.is_empty()).then_some((server, tool))
}

/// Outcome of a tool call.
///
/// A tool that ran but reported failure produces `Ok(ExecutionResult)` with
/// `error` set; bridge-level failures are `Err(BridgeError)` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Tool output as returned by the server.
    pub output: serde_json::Value,

    /// Tool-reported error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall time spent in the bridge for this call.
    #[serde(with = "duration_millis")]
    pub latency: Duration,

    /// Server that served the call.
    pub server: String,

    /// Whether the result came from the cache.
    pub cache_hit: bool,
}

impl ExecutionResult {
    pub fn success(server: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            output,
            error: None,
            latency: Duration::ZERO,
            server: server.into(),
            cache_hit: false,
        }
    }

    pub fn tool_error(
        server: impl Into<String>,
        output: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::success(server, output)
        }
    }

    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Lifecycle state of a server connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Stopped,
    Starting,
    Healthy,
    /// Recent health checks failed but the server may recover.
    Degraded,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.pad("stopped"),
            Self::Starting => f.pad("starting"),
            Self::Healthy => f.pad("healthy"),
            Self::Degraded => f.pad("degraded"),
        }
    }
}

/// Point-in-time view of one configured server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusInfo {
    pub name: String,
    pub status: ConnectionStatus,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Successful starts since the bridge was initialized.
    pub start_count: u32,
}
