//! Call command handler.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::handlers::{start_bridge, stop_bridge};

/// Call `tool` once and print its output.
///
/// A tool-level error is printed like any other output and then returned
/// as [`CliError::Tool`] so the exit code reflects it.
pub async fn execute(
    ctx: &CliContext,
    tool: &str,
    args: Option<&str>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let arguments = parse_arguments(args)?;

    start_bridge(ctx, false).await;
    let outcome = ctx
        .bridge
        .execute_tool(
            tool,
            arguments,
            &ctx.caller,
            timeout_secs.map(Duration::from_secs),
        )
        .await;
    stop_bridge(ctx).await;
    let result = outcome.map_err(CliError::from)?;

    tracing::debug!(
        server = %result.server,
        latency_ms = u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX),
        cache_hit = result.cache_hit,
        "Tool call finished"
    );
    println!("{}", render_output(&result.output));

    match result.error {
        Some(error) => Err(CliError::Tool(error).into()),
        None => Ok(()),
    }
}

/// Parse `--args`; absent means an empty object.
pub fn parse_arguments(raw: Option<&str>) -> Result<Value, CliError> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Map::new()));
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CliError::Arguments(format!("--args is not valid JSON: {e}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::Arguments("--args must be a JSON object".to_string()))
    }
}

/// Text content blocks print as plain text; anything else as pretty JSON.
pub fn render_output(output: &Value) -> String {
    if let Some(blocks) = output.as_array() {
        let texts: Option<Vec<&str>> = blocks
            .iter()
            .map(|block| {
                (block.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| block.get("text").and_then(Value::as_str))
                    .flatten()
            })
            .collect();
        if let Some(texts) = texts.filter(|t| !t.is_empty()) {
            return texts.join("\n");
        }
    }
    serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), json!({}));
        assert_eq!(
            parse_arguments(Some(r#"{"path": "/tmp"}"#)).unwrap(),
            json!({"path": "/tmp"})
        );
        assert!(matches!(
            parse_arguments(Some("[1, 2]")),
            Err(CliError::Arguments(_))
        ));
        assert!(matches!(
            parse_arguments(Some("{nope")),
            Err(CliError::Arguments(_))
        ));
    }

    #[test]
    fn test_render_text_blocks() {
        let output = json!([
            {"type": "text", "text": "line one"},
            {"type": "text", "text": "line two"}
        ]);
        assert_eq!(render_output(&output), "line one\nline two");
    }

    #[test]
    fn test_render_other_content_as_json() {
        let output = json!([{"type": "image", "data": "..."}]);
        assert!(render_output(&output).contains("\"image\""));
        assert_eq!(render_output(&json!({"n": 1})), "{\n  \"n\": 1\n}");
    }
}
