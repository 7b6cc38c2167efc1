//! JSON-RPC 2.0 messages and MCP payloads.
//!
//! Reference: <https://spec.modelcontextprotocol.io/>

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use toolbridge_core::{BridgeError, Tool};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version offered in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Versions a server may answer with.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Method names used by the bridge.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const SHUTDOWN: &str = "shutdown";
}

/// JSON-RPC request id. The bridge always sends numbers; servers may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Shape of a message, derived from which fields are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
}

/// One JSON-RPC message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `Some(Value::Null)` for an explicit `"result": null`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

fn present_value<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl WireMessage {
    fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(RequestId::Number(id)),
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::empty()
        }
    }

    pub fn error_response(id: RequestId, error: RpcError) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Self::empty()
        }
    }

    pub const fn kind(&self) -> MessageKind {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => MessageKind::Request,
            (Some(_), None) => MessageKind::Notification,
            (None, _) => MessageKind::Response,
        }
    }

    /// Parse and validate one frame.
    ///
    /// Rejects non-JSON input, top-level values that are not objects, a
    /// `jsonrpc` field other than `"2.0"`, and objects that are neither a
    /// request, a notification, nor a response.
    pub fn parse(frame: &[u8]) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_slice(frame)
            .map_err(|e| BridgeError::validation(format!("malformed JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, BridgeError> {
        if !value.is_object() {
            return Err(BridgeError::validation("message is not a JSON object"));
        }
        let message: Self = serde_json::from_value(value)
            .map_err(|e| BridgeError::validation(format!("malformed message: {e}")))?;

        if message.jsonrpc != JSONRPC_VERSION {
            return Err(BridgeError::validation(format!(
                "unsupported jsonrpc version '{}'",
                message.jsonrpc
            )));
        }
        if message.method.is_none() && (message.id.is_none() || !message.has_outcome()) {
            return Err(BridgeError::validation(
                "message is neither a request, a notification, nor a response",
            ));
        }
        Ok(message)
    }

    const fn has_outcome(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self)
            .map_err(|e| BridgeError::validation(format!("cannot encode message: {e}")))
    }

    /// Split a response into its result or error.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

// ===== MCP payloads =====

/// Parameters for `initialize`.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": "toolbridge",
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {}
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<ToolsCapability>,
    #[serde(default)]
    pub experimental: Option<Value>,
}

impl ServerCapabilities {
    /// Servers opt in to a graceful `shutdown` request through
    /// `capabilities.experimental.shutdown`.
    pub fn supports_shutdown(&self) -> bool {
        self.experimental
            .as_ref()
            .and_then(|e| e.get("shutdown"))
            .is_some_and(|v| v.as_bool().unwrap_or(true))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: Option<bool>,
}

/// One entry of a `tools/list` page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn into_tool(self, server: &str) -> Tool {
        let mut tool = Tool::new(server, self.name);
        tool.description = self.description;
        if let Some(schema) = self.input_schema {
            tool.input_schema = schema;
        }
        tool
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text of the first text content item, used as the error message when
    /// the tool reports failure.
    pub fn first_text(&self) -> Option<&str> {
        self.content
            .iter()
            .find_map(|item| item.get("text").and_then(Value::as_str))
    }

    /// Output exposed to callers: structured content when present, otherwise
    /// the content array.
    pub fn output(self) -> Value {
        self.structured_content
            .unwrap_or_else(|| Value::Array(self.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_omits_empty_fields() {
        let msg = WireMessage::request(7, methods::PING, None);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}));
        assert_eq!(msg.kind(), MessageKind::Request);
    }

    #[test]
    fn test_parse_rejects_invalid_frames() {
        assert!(WireMessage::parse(b"not json").is_err());
        assert!(WireMessage::parse(b"[1,2,3]").is_err());
        assert!(WireMessage::parse(br#"{"jsonrpc":"1.0","id":1,"result":{}}"#).is_err());
        assert!(WireMessage::parse(br#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(WireMessage::parse(br#"{"jsonrpc":"2.0","id":1}"#).is_err());
    }

    #[test]
    fn test_parse_kinds() {
        let resp = WireMessage::parse(br#"{"jsonrpc":"2.0","id":"abc","result":{"ok":true}}"#)
            .unwrap();
        assert_eq!(resp.kind(), MessageKind::Response);
        assert_eq!(resp.id, Some(RequestId::String("abc".into())));

        let note = WireMessage::parse(
            br#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        )
        .unwrap();
        assert_eq!(note.kind(), MessageKind::Notification);
    }

    #[test]
    fn test_null_result_is_a_response() {
        let msg = WireMessage::parse(br#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::Response);
        assert_eq!(msg.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn test_into_outcome_prefers_error() {
        let msg = WireMessage::error_response(
            RequestId::Number(1),
            RpcError::new(error_codes::INVALID_PARAMS, "bad"),
        );
        assert_eq!(msg.into_outcome().unwrap_err().code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_call_tool_result_output() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "disk full"}],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("disk full"));
        assert_eq!(result.output(), json!([{"type": "text", "text": "disk full"}]));
    }

    #[test]
    fn test_supports_shutdown() {
        let caps: ServerCapabilities =
            serde_json::from_value(json!({"experimental": {"shutdown": true}})).unwrap();
        assert!(caps.supports_shutdown());
        assert!(!ServerCapabilities::default().supports_shutdown());
    }
}
