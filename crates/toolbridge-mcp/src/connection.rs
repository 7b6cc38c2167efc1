//! A live session with one tool server.
//!
//! A [`Connection`] owns the sending half of a transport and a reader task
//! that demultiplexes incoming messages. Requests are correlated by id
//! through a map of `oneshot` senders, so any number of calls may be in
//! flight and responses may arrive in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use toolbridge_core::{BridgeError, ConnectionStatus, ExecutionResult, Tool};

use crate::launcher::{LaunchedServer, ServerProcess};
use crate::lock::{lock, read, write};
use crate::protocol::{
    CallToolResult, InitializeResult, ListToolsResult, MessageKind, RequestId, RpcError,
    SUPPORTED_PROTOCOL_VERSIONS, ServerInfo, WireMessage, error_codes, initialize_params, methods,
};
use crate::transport::{TransportReceiver, TransportSender};

/// Upper bound on `tools/list` pages fetched in one refresh.
const MAX_TOOL_PAGES: usize = 64;

#[derive(Debug, Default)]
struct HealthState {
    status: ConnectionStatus,
    last_check: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// One live session with a tool server.
pub struct Connection {
    server: String,
    writer: tokio::sync::Mutex<TransportSender>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<WireMessage>>>,
    closed: AtomicBool,
    close_reason: Mutex<Option<BridgeError>>,
    cancel: CancellationToken,
    negotiated: OnceLock<InitializeResult>,
    tools: RwLock<Vec<Tool>>,
    tools_stale: AtomicBool,
    process: tokio::sync::Mutex<Option<Box<dyn ServerProcess>>>,
    health: Mutex<HealthState>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.server)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Attach to a launched server and perform the MCP handshake.
    ///
    /// `initialize` → protocol version check → `notifications/initialized`
    /// → `tools/list`, all within `handshake_timeout`. The reader task stops
    /// when `parent` is cancelled.
    pub async fn open(
        server: impl Into<String>,
        launched: LaunchedServer,
        parent: &CancellationToken,
        handshake_timeout: Duration,
    ) -> Result<Arc<Self>, BridgeError> {
        let (sender, receiver) = launched.transport.into_split();
        let cancel = parent.child_token();
        let connection = Self::build(server.into(), sender, launched.process, cancel.clone());

        tokio::spawn(read_loop(Arc::downgrade(&connection), receiver, cancel));

        let handshake =
            tokio::time::timeout(handshake_timeout, connection.handshake(handshake_timeout))
                .await
                .unwrap_or(Err(BridgeError::Timeout(handshake_timeout)));

        if let Err(e) = handshake {
            tracing::warn!(server_name = %connection.server, error = %e, "Handshake failed");
            let _ = connection.close(Duration::ZERO).await;
            return Err(e);
        }

        connection.set_status(ConnectionStatus::Healthy);
        Ok(connection)
    }

    fn build(
        server: String,
        sender: TransportSender,
        process: Option<Box<dyn ServerProcess>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            writer: tokio::sync::Mutex::new(sender),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            cancel,
            negotiated: OnceLock::new(),
            tools: RwLock::new(Vec::new()),
            tools_stale: AtomicBool::new(false),
            process: tokio::sync::Mutex::new(process),
            health: Mutex::new(HealthState {
                status: ConnectionStatus::Starting,
                ..HealthState::default()
            }),
        })
    }

    /// A connection with no peer or reader, for registry tests.
    #[cfg(test)]
    pub(crate) fn detached(server: &str) -> Arc<Self> {
        use crate::transport::{Transport, TransportLimits};

        let (client, _peer) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(client);
        let (sender, _receiver) =
            Transport::line_delimited(reader, writer, TransportLimits::default()).into_split();
        Self::build(server.to_string(), sender, None, CancellationToken::new())
    }

    #[cfg(test)]
    pub(crate) fn close_for_test(&self) {
        self.mark_closed(BridgeError::connection("closed by test"));
    }

    async fn handshake(&self, timeout: Duration) -> Result<(), BridgeError> {
        let result = self
            .request(methods::INITIALIZE, Some(initialize_params()), timeout)
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| BridgeError::server(format!("invalid initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(BridgeError::server(format!(
                "unsupported protocol version '{}'",
                init.protocol_version
            )));
        }

        tracing::debug!(
            server_name = %self.server,
            protocol_version = %init.protocol_version,
            remote_name = init.server_info.as_ref().map(|i| i.name.as_str()),
            "Initialized tool server"
        );
        let _ = self.negotiated.set(init);

        self.notify(methods::INITIALIZED, None).await?;
        self.refresh_tools(timeout).await?;
        Ok(())
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.negotiated.get().map(|i| i.protocol_version.as_str())
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.negotiated.get().and_then(|i| i.server_info.as_ref())
    }

    fn supports_shutdown(&self) -> bool {
        self.negotiated
            .get()
            .is_some_and(|i| i.capabilities.supports_shutdown())
    }

    // ===== Tools =====

    /// Tools discovered at the last refresh.
    pub fn tools(&self) -> Vec<Tool> {
        read(&self.tools).clone()
    }

    /// Whether the server announced that its tool list changed.
    pub fn tools_stale(&self) -> bool {
        self.tools_stale.load(Ordering::SeqCst)
    }

    /// Re-fetch the tool list, following pagination cursors.
    pub async fn refresh_tools(&self, timeout: Duration) -> Result<Vec<Tool>, BridgeError> {
        // Cleared first so an announcement during the fetch is not lost.
        self.tools_stale.store(false, Ordering::SeqCst);

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(methods::TOOLS_LIST, params, timeout).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| BridgeError::server(format!("invalid tools/list result: {e}")))?;

            tools.extend(page.tools.into_iter().map(|d| d.into_tool(&self.server)));

            match page.next_cursor {
                Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => {
                    cursor = None;
                    break;
                }
            }
        }
        if cursor.is_some() {
            tracing::warn!(
                server_name = %self.server,
                pages = MAX_TOOL_PAGES,
                "Tool list truncated after page limit"
            );
        }

        tracing::debug!(server_name = %self.server, tool_count = tools.len(), "Discovered tools");
        write(&self.tools).clone_from(&tools);
        Ok(tools)
    }

    /// Tools paired with this connection as their invoke handle.
    pub fn bound_tools(self: &Arc<Self>) -> Vec<BoundTool> {
        read(&self.tools)
            .iter()
            .map(|tool| BoundTool {
                tool: tool.clone(),
                connection: Arc::clone(self),
            })
            .collect()
    }

    /// Look up one discovered tool by its unqualified name.
    pub fn bind(self: &Arc<Self>, tool_name: &str) -> Option<BoundTool> {
        read(&self.tools)
            .iter()
            .find(|t| t.name == tool_name)
            .map(|tool| BoundTool {
                tool: tool.clone(),
                connection: Arc::clone(self),
            })
    }

    // ===== Requests =====

    /// Call a tool. A tool-level failure (`isError` or a JSON-RPC error
    /// response) is an `Ok` result with `error` set.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ExecutionResult, BridgeError> {
        let started = Instant::now();
        let params = json!({ "name": tool_name, "arguments": arguments });

        let mut result = match self
            .request_raw(methods::TOOLS_CALL, Some(params), timeout)
            .await?
        {
            Ok(value) => {
                let call: CallToolResult = serde_json::from_value(value)
                    .map_err(|e| BridgeError::server(format!("invalid tools/call result: {e}")))?;
                if call.is_error {
                    let message = call
                        .first_text()
                        .unwrap_or("tool reported an error")
                        .to_string();
                    ExecutionResult::tool_error(&self.server, call.output(), message)
                } else {
                    ExecutionResult::success(&self.server, call.output())
                }
            }
            Err(rpc) => ExecutionResult::tool_error(
                &self.server,
                rpc.data.unwrap_or(Value::Null),
                rpc.message,
            ),
        };
        result.latency = started.elapsed();
        Ok(result)
    }

    /// Liveness probe. Any response, including a JSON-RPC error, counts.
    pub async fn ping(&self, timeout: Duration) -> Result<(), BridgeError> {
        self.request_raw(methods::PING, None, timeout).await.map(|_| ())
    }

    /// Send a request and return its result; JSON-RPC errors become
    /// `BridgeError::Server`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.request_raw(method, params, timeout)
            .await?
            .map_err(|e| BridgeError::server(format!("{method} failed: {} (code {})", e.message, e.code)))
    }

    /// Send a request and wait for the matching response.
    ///
    /// On timeout the pending slot is released and the server is told via
    /// `notifications/cancelled`.
    pub async fn request_raw(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Result<Value, RpcError>, BridgeError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let slot = PendingSlot {
            connection: self,
            id,
        };

        // The reader may have closed between the check and the insert.
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let message = WireMessage::request(id, method, params);
        let exchange = async {
            self.writer.lock().await.send(&message).await?;
            rx.await.map_err(|_| self.closed_error())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(response) => {
                drop(slot);
                Ok(response?.into_outcome())
            }
            Err(_) => {
                drop(slot);
                tracing::debug!(server_name = %self.server, method, id, "Request timed out");
                self.notify_cancelled(id).await;
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.writer
            .lock()
            .await
            .send(&WireMessage::notification(method, params))
            .await
    }

    async fn notify_cancelled(&self, id: u64) {
        let params = json!({ "requestId": id, "reason": "timeout" });
        if let Err(e) = self.notify(methods::CANCELLED, Some(params)).await {
            tracing::debug!(server_name = %self.server, error = %e, "Could not send cancellation");
        }
    }

    // ===== Incoming =====

    fn dispatch(self: &Arc<Self>, message: WireMessage) {
        match message.kind() {
            MessageKind::Response => self.complete(message),
            MessageKind::Request => self.answer(message),
            MessageKind::Notification => self.on_notification(&message),
        }
    }

    fn complete(&self, message: WireMessage) {
        let waiter = match &message.id {
            Some(RequestId::Number(id)) => lock(&self.pending).remove(id),
            _ => None,
        };
        match waiter {
            // A dropped receiver means the caller already gave up.
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                tracing::debug!(
                    server_name = %self.server,
                    id = ?message.id,
                    "Discarding response with no pending request"
                );
            }
        }
    }

    fn answer(self: &Arc<Self>, message: WireMessage) {
        let (Some(id), Some(method)) = (message.id, message.method) else {
            return;
        };
        let reply = if method == methods::PING {
            WireMessage::response(id, json!({}))
        } else {
            WireMessage::error_response(
                id,
                RpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("method '{method}' is not supported by this client"),
                ),
            )
        };

        // Replying from a separate task keeps the reader from blocking on
        // the writer lock.
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = connection.writer.lock().await.send(&reply).await {
                tracing::debug!(server_name = %connection.server, error = %e, "Reply failed");
            }
        });
    }

    fn on_notification(&self, message: &WireMessage) {
        match message.method.as_deref() {
            Some(methods::TOOLS_LIST_CHANGED) => {
                tracing::info!(server_name = %self.server, "Tool list changed");
                self.tools_stale.store(true, Ordering::SeqCst);
            }
            method => {
                tracing::trace!(server_name = %self.server, method, "Ignoring notification");
            }
        }
    }

    fn mark_closed(&self, reason: BridgeError) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.close_reason).get_or_insert(reason);
        // Dropping the senders wakes every waiter with a receive error.
        lock(&self.pending).clear();
        self.set_status(ConnectionStatus::Stopped);
    }

    fn closed_error(&self) -> BridgeError {
        match lock(&self.close_reason).as_ref() {
            // An oversized message keeps its category so callers do not retry.
            Some(reason @ BridgeError::Validation(_)) => reason.clone(),
            _ => BridgeError::connection(format!("connection to '{}' is closed", self.server)),
        }
    }

    // ===== Health =====

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.health).status
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        lock(&self.health).status = status;
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        lock(&self.health).last_check
    }

    /// Record a health probe outcome and return the resulting status.
    ///
    /// The first failure degrades the connection; `failure_limit`
    /// consecutive failures stop it.
    pub(crate) fn record_health(&self, healthy: bool, failure_limit: u32) -> ConnectionStatus {
        let mut health = lock(&self.health);
        health.last_check = Some(Utc::now());
        if healthy {
            health.consecutive_failures = 0;
            health.status = ConnectionStatus::Healthy;
        } else {
            health.consecutive_failures += 1;
            health.status = if health.consecutive_failures >= failure_limit {
                ConnectionStatus::Stopped
            } else {
                ConnectionStatus::Degraded
            };
        }
        health.status
    }

    /// `Some(success)` once the backing process has exited; `None` while it
    /// runs or for remote servers.
    pub async fn process_exit(&self) -> Option<bool> {
        self.process.lock().await.as_mut()?.exit_status()
    }

    // ===== Shutdown =====

    /// Stop the session.
    ///
    /// Sends `shutdown` when the server advertised support, closes the
    /// writer (EOF on a pipe), stops the reader, then stops the process
    /// with `grace` between escalation steps.
    pub async fn close(&self, grace: Duration) -> Result<(), BridgeError> {
        if !self.is_closed() && self.supports_shutdown() {
            if let Err(e) = self.request(methods::SHUTDOWN, None, grace).await {
                tracing::debug!(server_name = %self.server, error = %e, "Shutdown request failed");
            }
        }

        if let Ok(mut writer) = tokio::time::timeout(grace, self.writer.lock()).await {
            let _ = writer.close().await;
        }
        self.cancel.cancel();
        self.mark_closed(BridgeError::connection("connection closed"));

        let process = self.process.lock().await.take();
        match process {
            Some(mut process) => process.terminate(grace).await,
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Removes a pending entry when the request finishes or is abandoned.
struct PendingSlot<'a> {
    connection: &'a Connection,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        lock(&self.connection.pending).remove(&self.id);
    }
}

async fn read_loop(
    connection: Weak<Connection>,
    mut receiver: TransportReceiver,
    cancel: CancellationToken,
) {
    let reason = loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break BridgeError::connection("connection closed"),
            received = receiver.receive() => received,
        };
        let Some(conn) = connection.upgrade() else {
            return;
        };
        match received {
            Ok(message) => conn.dispatch(message),
            Err(e) => {
                tracing::warn!(server_name = %conn.server, error = %e, "Connection reader stopped");
                break e;
            }
        }
    };

    if let Some(conn) = connection.upgrade() {
        conn.mark_closed(reason);
    }
}

/// A discovered tool bound to the connection that serves it.
#[derive(Debug, Clone)]
pub struct BoundTool {
    pub tool: Tool,
    connection: Arc<Connection>,
}

impl BoundTool {
    pub fn qualified_name(&self) -> String {
        self.tool.qualified_name()
    }

    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub async fn invoke(
        &self,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ExecutionResult, BridgeError> {
        self.connection
            .call_tool(&self.tool.name, arguments, timeout)
            .await
    }
}
