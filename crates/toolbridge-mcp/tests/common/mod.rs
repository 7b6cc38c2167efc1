//! In-memory MCP server used by the integration suites.
//!
//! [`FakeLauncher`] hands the bridge one end of a duplex pipe and serves the
//! other end from a task. Tools:
//!
//! - `echo`: returns `arguments.text`, or the arguments as JSON text
//! - `fail`: tool-level error (`isError: true`)
//! - `slow`: answers after two seconds
//! - `big`: returns a 64 KiB string

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::Mutex;
use toolbridge_core::{BackoffPolicy, BridgeError, BridgeSettings, ServerConfig, TransportKind};
use toolbridge_mcp::{LaunchOptions, LaunchedServer, Launcher, Transport, ValidatedServerConfig};

/// How a fake server behaves.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub tools: Vec<String>,
    /// Delay before each launch completes, to widen race windows.
    pub launch_delay: Duration,
    /// Write a line of garbage before every response.
    pub garbage_before_replies: bool,
    /// Close the pipe after this many `tools/call` responses.
    pub exit_after_calls: Option<usize>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            tools: ["echo", "fail", "slow", "big"].map(String::from).to_vec(),
            launch_delay: Duration::ZERO,
            garbage_before_replies: false,
            exit_after_calls: None,
        }
    }
}

impl Behavior {
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Counters shared between a launcher and the servers it starts.
#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub calls: AtomicUsize,
    /// While set, every server leaves `ping` unanswered.
    pub pings_muted: AtomicBool,
}

impl Counters {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn mute_pings(&self, muted: bool) {
        self.pings_muted.store(muted, Ordering::SeqCst);
    }
}

/// Launcher that serves every server from memory with one behavior.
pub struct FakeLauncher {
    behavior: Behavior,
    pub counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            counters: Arc::new(Counters::default()),
        })
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(
        &self,
        server: &ValidatedServerConfig,
        options: LaunchOptions,
    ) -> Result<LaunchedServer, BridgeError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if !self.behavior.launch_delay.is_zero() {
            tokio::time::sleep(self.behavior.launch_delay).await;
        }

        let (client, peer) = tokio::io::duplex(256 * 1024);
        let (reader, writer) = tokio::io::split(client);
        tokio::spawn(serve(
            peer,
            server.name().to_string(),
            self.behavior.clone(),
            Arc::clone(&self.counters),
        ));
        Ok(LaunchedServer::remote(Transport::line_delimited(
            reader,
            writer,
            options.limits,
        )))
    }
}

type Writer = Arc<Mutex<WriteHalf<tokio::io::DuplexStream>>>;

async fn serve(
    stream: tokio::io::DuplexStream,
    name: String,
    behavior: Behavior,
    counters: Arc<Counters>,
) {
    let (reader, writer) = tokio::io::split(stream);
    let writer: Writer = Arc::new(Mutex::new(writer));
    let mut lines = BufReader::new(reader).lines();
    let answered = Arc::new(AtomicUsize::new(0));

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        let method = request["method"].as_str().unwrap_or_default().to_string();

        match method.as_str() {
            "initialize" => {
                let result = json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": name, "version": "0.0.1"},
                    "capabilities": {"tools": {"listChanged": true}}
                });
                respond(&writer, &behavior, json!({"jsonrpc": "2.0", "id": id, "result": result}))
                    .await;
            }
            "tools/list" => {
                let tools: Vec<Value> = behavior
                    .tools
                    .iter()
                    .map(|t| json!({"name": t, "inputSchema": {"type": "object"}}))
                    .collect();
                respond(
                    &writer,
                    &behavior,
                    json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}}),
                )
                .await;
            }
            "ping" if counters.pings_muted.load(Ordering::SeqCst) => {}
            "ping" | "shutdown" => {
                respond(&writer, &behavior, json!({"jsonrpc": "2.0", "id": id, "result": {}}))
                    .await;
            }
            "tools/call" => {
                counters.calls.fetch_add(1, Ordering::SeqCst);
                let writer = Arc::clone(&writer);
                let behavior = behavior.clone();
                let answered = Arc::clone(&answered);
                tokio::spawn(async move {
                    let result = call(&request["params"]).await;
                    respond(&writer, &behavior, json!({"jsonrpc": "2.0", "id": id, "result": result}))
                        .await;
                    let done = answered.fetch_add(1, Ordering::SeqCst) + 1;
                    if behavior.exit_after_calls.is_some_and(|limit| done >= limit) {
                        let _ = writer.lock().await.shutdown().await;
                    }
                });
            }
            _ => {
                respond(
                    &writer,
                    &behavior,
                    json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "method not found"}}),
                )
                .await;
            }
        }

        if behavior
            .exit_after_calls
            .is_some_and(|limit| answered.load(Ordering::SeqCst) >= limit)
        {
            break;
        }
    }
}

async fn call(params: &Value) -> Value {
    let arguments = &params["arguments"];
    match params["name"].as_str().unwrap_or_default() {
        "fail" => json!({"content": [{"type": "text", "text": "it broke"}], "isError": true}),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            json!({"content": [{"type": "text", "text": "finally"}]})
        }
        "big" => json!({"content": [{"type": "text", "text": "x".repeat(64 * 1024)}]}),
        _ => {
            let text = arguments["text"]
                .as_str()
                .map_or_else(|| arguments.to_string(), str::to_string);
            json!({"content": [{"type": "text", "text": text}]})
        }
    }
}

async fn respond(writer: &Writer, behavior: &Behavior, message: Value) {
    let mut writer = writer.lock().await;
    if behavior.garbage_before_replies {
        let _ = writer.write_all(b"this is not json\n").await;
    }
    let _ = writer.write_all(format!("{message}\n").as_bytes()).await;
    let _ = writer.flush().await;
}

/// Settings tuned for fast tests.
pub fn test_settings() -> BridgeSettings {
    BridgeSettings {
        handshake_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(200),
        health_check_timeout: Duration::from_secs(1),
        backoff: BackoffPolicy::immediate(),
        ..BridgeSettings::with_defaults()
    }
}

/// A server config the fake launcher will serve. Remote, so validation does
/// not resolve any launcher on the host.
pub fn fake_server(name: &str) -> ServerConfig {
    ServerConfig::remote(name, TransportKind::Socket, "127.0.0.1:9")
}

/// First text block of a tool output.
pub fn text(output: &Value) -> &str {
    output[0]["text"].as_str().unwrap_or_default()
}
