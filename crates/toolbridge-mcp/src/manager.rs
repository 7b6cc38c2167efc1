//! The tool bridge: what the agent runtime calls.
//!
//! [`ToolBridge`] owns every piece of shared state (supervisors, the
//! connection pool, the rate limiter, the result cache) plus the background
//! tasks that keep servers healthy. Construct one per process, or per test.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use toolbridge_core::{
    BridgeError, BridgeSettings, CallerPolicyPort, ConnectionStatus, EnvProvider,
    ExecutionResult, RateLimitConfig, ServerConfig, ServerStatusInfo, SystemEnv, Tool,
    apply_server_overrides, split_qualified,
};

use crate::cache::{ResultCache, cache_key};
use crate::connection::Connection;
use crate::launcher::{Launcher, ProcessLauncher};
use crate::lock::{lock, read, write};
use crate::pool::ConnectionPool;
use crate::rate_limit::RateLimiter;
use crate::security::SecurityValidator;
use crate::supervisor::Supervisor;

/// Tracing target for per-call audit entries.
pub const AUDIT_TARGET: &str = "toolbridge::audit";

/// How long shutdown waits for background tasks before aborting them.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor for background loop periods; `interval` rejects zero.
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(100);

/// Outcome of [`ToolBridge::initialize`].
#[derive(Debug, Default)]
pub struct InitReport {
    /// Servers that passed validation and are now managed.
    pub registered: Vec<String>,
    /// Auto-start servers that are connected.
    pub started: Vec<String>,
    /// Configurations rejected by validation.
    pub rejected: Vec<(String, BridgeError)>,
    /// Auto-start servers that did not come up. They are retried on first use.
    pub failed: Vec<(String, BridgeError)>,
}

/// Outcome of [`ToolBridge::shutdown`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub failed: Vec<(String, BridgeError)>,
    /// Background tasks that had to be aborted.
    pub aborted_tasks: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.aborted_tasks == 0
    }
}

/// Bridge between the agent runtime and external tool servers.
pub struct ToolBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    settings: BridgeSettings,
    policy: Arc<dyn CallerPolicyPort>,
    launcher: Arc<dyn Launcher>,
    validator: SecurityValidator,
    env: Arc<dyn EnvProvider>,
    supervisors: RwLock<BTreeMap<String, Arc<Supervisor>>>,
    /// Last tool list seen per server, used to resolve unqualified names
    /// even when the server is not currently connected.
    catalogs: RwLock<HashMap<String, Vec<Tool>>>,
    pool: ConnectionPool,
    limiter: RateLimiter,
    cache: ResultCache,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sweeper_started: AtomicBool,
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("enabled", &self.inner.settings.enabled)
            .field("servers", &self.server_names())
            .field("connected", &self.inner.pool.names())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`ToolBridge`] with non-default collaborators.
pub struct ToolBridgeBuilder {
    settings: BridgeSettings,
    policy: Arc<dyn CallerPolicyPort>,
    launcher: Arc<dyn Launcher>,
    validator: SecurityValidator,
    env: Arc<dyn EnvProvider>,
}

impl ToolBridgeBuilder {
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: SecurityValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Environment consulted for per-server overrides.
    #[must_use]
    pub fn env(mut self, env: Arc<dyn EnvProvider>) -> Self {
        self.env = env;
        self
    }

    pub fn build(self) -> ToolBridge {
        ToolBridge {
            inner: Arc::new(BridgeInner {
                pool: ConnectionPool::new(self.settings.max_connections),
                settings: self.settings,
                policy: self.policy,
                launcher: self.launcher,
                validator: self.validator,
                env: self.env,
                supervisors: RwLock::new(BTreeMap::new()),
                catalogs: RwLock::new(HashMap::new()),
                limiter: RateLimiter::new(),
                cache: ResultCache::new(),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                sweeper_started: AtomicBool::new(false),
            }),
        }
    }
}

impl ToolBridge {
    /// A bridge that spawns real processes.
    pub fn new(settings: BridgeSettings, policy: Arc<dyn CallerPolicyPort>) -> Self {
        Self::builder(settings, policy).build()
    }

    /// A bridge that launches servers through `launcher`.
    pub fn with_launcher(
        settings: BridgeSettings,
        policy: Arc<dyn CallerPolicyPort>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self::builder(settings, policy).launcher(launcher).build()
    }

    pub fn builder(
        settings: BridgeSettings,
        policy: Arc<dyn CallerPolicyPort>,
    ) -> ToolBridgeBuilder {
        ToolBridgeBuilder {
            settings,
            policy,
            launcher: Arc::new(ProcessLauncher),
            validator: SecurityValidator::system(),
            env: Arc::new(SystemEnv),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    /// Names of every registered server, sorted.
    pub fn server_names(&self) -> Vec<String> {
        read(&self.inner.supervisors).keys().cloned().collect()
    }

    /// Register servers, start the `auto_start` ones and launch background
    /// tasks.
    ///
    /// Invalid or duplicate configurations are reported, not fatal. May be
    /// called again to add servers. Does nothing when the bridge is disabled.
    pub async fn initialize(&self, configs: Vec<ServerConfig>) -> InitReport {
        let inner = &self.inner;
        let mut report = InitReport::default();
        if !inner.settings.enabled {
            tracing::info!("Tool bridge disabled, skipping initialization");
            return report;
        }

        let mut auto_start = Vec::new();
        for mut config in configs {
            apply_server_overrides(&mut config, inner.env.as_ref());
            let name = config.name.clone();

            if read(&inner.supervisors).contains_key(&name) {
                let error = BridgeError::validation(format!("duplicate server name '{name}'"));
                tracing::warn!(server_name = %name, error = %error, "Rejected server config");
                report.rejected.push((name, error));
                continue;
            }

            let validated = match inner.validator.validate(config) {
                Ok(validated) => validated,
                Err(error) => {
                    tracing::warn!(server_name = %name, error = %error, "Rejected server config");
                    report.rejected.push((name, error));
                    continue;
                }
            };

            if validated.config().auto_start {
                auto_start.push(name.clone());
            }
            let supervisor = Supervisor::new(
                Arc::new(validated),
                Arc::clone(&inner.launcher),
                &inner.settings,
                inner.cancel.child_token(),
            );
            write(&inner.supervisors).insert(name.clone(), Arc::new(supervisor));
            self.spawn_task(health_loop(Arc::clone(inner), name.clone()));
            report.registered.push(name);
        }

        if !inner.sweeper_started.swap(true, Ordering::SeqCst) {
            self.spawn_task(sweep_loop(Arc::clone(inner)));
        }

        let results = join_all(auto_start.iter().map(|name| inner.ensure_connected(name))).await;
        for (name, result) in auto_start.into_iter().zip(results) {
            match result {
                Ok(_) => report.started.push(name),
                Err(error) => {
                    tracing::warn!(
                        server_name = %name,
                        error = %error,
                        "Failed to auto-start tool server"
                    );
                    report.failed.push((name, error));
                }
            }
        }

        tracing::info!(
            registered = report.registered.len(),
            started = report.started.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Tool bridge initialized"
        );
        report
    }

    fn spawn_task<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        lock(&self.inner.tasks).push(tokio::spawn(task));
    }

    /// Tools the caller may use, from currently connected servers.
    ///
    /// Catalogs the server announced as changed are re-fetched first.
    pub async fn list_tools(&self, identity: &str) -> Result<Vec<Tool>, BridgeError> {
        self.ensure_enabled()?;
        let policy = self.inner.policy.caller_policy(identity).await?;

        let mut tools = Vec::new();
        for name in self.inner.pool.names() {
            let Some(connection) = self.inner.pool.acquire(&name) else {
                continue;
            };
            tools.extend(
                self.inner
                    .current_tools(&connection)
                    .await
                    .into_iter()
                    .filter(|tool| policy.permits(&tool.qualified_name())),
            );
        }
        Ok(tools)
    }

    /// Run one tool call on behalf of `identity`.
    ///
    /// `tool` is either `server:tool` or an unqualified name that exactly
    /// one known server provides. `timeout` overrides the server and global
    /// defaults. Every outcome is written to the [`AUDIT_TARGET`] log.
    pub async fn execute_tool(
        &self,
        tool: &str,
        arguments: Value,
        identity: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, BridgeError> {
        let started = Instant::now();
        let mut server = None;
        let outcome = self
            .inner
            .execute(tool, arguments, identity, timeout, &mut server)
            .await
            .map(|mut result| {
                result.latency = started.elapsed();
                result
            });
        audit(tool, identity, server.as_deref(), &outcome, started.elapsed());
        outcome
    }

    /// Connect to `server` if needed and return its tools.
    pub async fn connect(&self, server: &str) -> Result<Vec<Tool>, BridgeError> {
        self.ensure_enabled()?;
        let connection = self.inner.ensure_connected(server).await?;
        Ok(self.inner.current_tools(&connection).await)
    }

    /// Health-check `server` once, restarting it if the check finds it
    /// stopped and its restart policy allows.
    ///
    /// Servers that were never started report `Stopped` without being
    /// launched. A server whose connection was already evicted after it
    /// closed is treated as a failed exit.
    pub async fn check_health(&self, server: &str) -> Result<ConnectionStatus, BridgeError> {
        self.ensure_enabled()?;
        if self.inner.supervisor(server).is_none() {
            return Err(unknown_server(server));
        }
        Ok(self.inner.supervise(server).await)
    }

    /// Snapshot of every registered server.
    pub fn status(&self) -> Result<Vec<ServerStatusInfo>, BridgeError> {
        self.ensure_enabled()?;
        let supervisors: Vec<Arc<Supervisor>> =
            read(&self.inner.supervisors).values().cloned().collect();

        Ok(supervisors
            .iter()
            .map(|supervisor| {
                let connection = self.inner.pool.peek(supervisor.name());
                let status = match &connection {
                    Some(conn) if !conn.is_closed() => conn.status(),
                    _ => ConnectionStatus::Stopped,
                };
                ServerStatusInfo {
                    name: supervisor.name().to_string(),
                    status,
                    tool_count: connection.as_ref().map_or(0, |c| c.tools().len()),
                    last_health_check: connection.as_ref().and_then(|c| c.last_health_check()),
                    start_count: supervisor.start_count(),
                }
            })
            .collect())
    }

    /// Stop background tasks and every connection.
    ///
    /// Never fails; problems are logged and collected in the report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let inner = &self.inner;
        let mut report = ShutdownReport::default();
        inner.cancel.cancel();

        let tasks = std::mem::take(&mut *lock(&inner.tasks));
        let deadline = tokio::time::Instant::now() + TASK_SHUTDOWN_TIMEOUT;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                report.aborted_tasks += 1;
            }
        }

        let grace = inner.settings.shutdown_grace;
        // Shutdown request, then up to two escalation waits, plus slack.
        let bound = grace * 3 + Duration::from_secs(1);
        let connections = inner.pool.drain();
        let results = join_all(connections.into_iter().map(|connection| async move {
            let name = connection.server().to_string();
            let outcome = tokio::time::timeout(bound, connection.close(grace))
                .await
                .unwrap_or(Err(BridgeError::Timeout(bound)));
            (name, outcome)
        }))
        .await;

        for (name, outcome) in results {
            match outcome {
                Ok(()) => report.stopped.push(name),
                Err(error) => {
                    tracing::warn!(server_name = %name, error = %error, "Failed to stop tool server");
                    report.failed.push((name, error));
                }
            }
        }
        inner.cache.clear();

        tracing::info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            aborted_tasks = report.aborted_tasks,
            "Tool bridge shut down"
        );
        report
    }

    fn ensure_enabled(&self) -> Result<(), BridgeError> {
        if self.inner.settings.enabled {
            Ok(())
        } else {
            Err(BridgeError::Disabled)
        }
    }
}

impl Drop for ToolBridge {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl BridgeInner {
    fn supervisor(&self, name: &str) -> Option<Arc<Supervisor>> {
        read(&self.supervisors).get(name).cloned()
    }

    fn record_catalog(&self, server: &str, tools: Vec<Tool>) {
        write(&self.catalogs).insert(server.to_string(), tools);
    }

    /// The live connection for `name`, starting the server if needed.
    ///
    /// Concurrent callers serialize on the per-name startup lock and
    /// re-check the pool, so only one of them starts the server.
    async fn ensure_connected(&self, name: &str) -> Result<Arc<Connection>, BridgeError> {
        if let Some(connection) = self.pool.acquire(name) {
            return Ok(connection);
        }
        let supervisor = self.supervisor(name).ok_or_else(|| unknown_server(name))?;

        let startup = self.pool.startup_lock(name);
        let _guard = startup.lock().await;
        if let Some(connection) = self.pool.acquire(name) {
            return Ok(connection);
        }
        if self.cancel.is_cancelled() {
            return Err(BridgeError::connection("bridge is shutting down"));
        }

        let connection = supervisor.start().await?;
        if let Err(e) = self.pool.insert(Arc::clone(&connection)) {
            let _ = supervisor.stop(&connection).await;
            return Err(e);
        }
        // Shutdown may have drained the pool while we were starting.
        if self.cancel.is_cancelled() {
            self.pool.release(&connection);
            let _ = supervisor.stop(&connection).await;
            return Err(BridgeError::connection("bridge is shutting down"));
        }

        self.record_catalog(name, connection.tools());
        Ok(connection)
    }

    /// Tools of `connection`, re-fetched first when marked stale.
    async fn current_tools(&self, connection: &Connection) -> Vec<Tool> {
        if connection.tools_stale() {
            match connection.refresh_tools(self.settings.default_timeout).await {
                Ok(tools) => {
                    tracing::debug!(
                        server_name = %connection.server(),
                        tool_count = tools.len(),
                        "Refreshed tool catalog"
                    );
                    self.record_catalog(connection.server(), tools);
                }
                Err(e) => {
                    tracing::warn!(
                        server_name = %connection.server(),
                        error = %e,
                        "Failed to refresh tool catalog"
                    );
                }
            }
        }
        connection.tools()
    }

    /// Map a requested tool name to `(server, tool)`.
    fn resolve(&self, requested: &str) -> Result<(String, String), BridgeError> {
        if let Some((server, tool)) = split_qualified(requested) {
            if read(&self.supervisors).contains_key(server) {
                let known_missing = read(&self.catalogs)
                    .get(server)
                    .is_some_and(|tools| !tools.iter().any(|t| t.name == tool));
                if known_missing {
                    return Err(BridgeError::ToolNotFound(requested.to_string()));
                }
                return Ok((server.to_string(), tool.to_string()));
            }
            // Not a registered server; the colon may be part of a tool name.
        }

        let catalogs = read(&self.catalogs);
        let mut servers: Vec<&String> = catalogs
            .iter()
            .filter(|(_, tools)| tools.iter().any(|t| t.name == requested))
            .map(|(server, _)| server)
            .collect();
        servers.sort();

        match servers.as_slice() {
            [] => Err(BridgeError::ToolNotFound(requested.to_string())),
            [server] => Ok(((*server).clone(), requested.to_string())),
            _ => {
                let candidates: Vec<String> = servers
                    .iter()
                    .map(|server| format!("{server}:{requested}"))
                    .collect();
                Err(BridgeError::validation(format!(
                    "tool name '{requested}' is ambiguous, use one of {}",
                    candidates.join(", ")
                )))
            }
        }
    }

    async fn execute(
        &self,
        requested: &str,
        arguments: Value,
        identity: &str,
        timeout: Option<Duration>,
        resolved_server: &mut Option<String>,
    ) -> Result<ExecutionResult, BridgeError> {
        if !self.settings.enabled {
            return Err(BridgeError::Disabled);
        }

        let (server, tool) = self.resolve(requested)?;
        *resolved_server = Some(server.clone());
        let qualified = format!("{server}:{tool}");
        let supervisor = self
            .supervisor(&server)
            .ok_or_else(|| BridgeError::ToolNotFound(qualified.clone()))?;
        let config = supervisor.config().config();

        let policy = self.policy.caller_policy(identity).await?;
        if !policy.permits(&qualified) {
            return Err(BridgeError::PermissionDenied(qualified));
        }

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            object @ Value::Object(_) => object,
            other => {
                return Err(BridgeError::validation(format!(
                    "arguments must be a JSON object, got {}",
                    json_type(&other)
                )));
            }
        };
        self.admit(identity, &server, policy.rate_limit, config.rate_limit)?;

        let ttl = config.cache_ttl();
        let key = (!ttl.is_zero()).then(|| cache_key(&server, &tool, &arguments));
        if let Some(output) = key.as_deref().and_then(|k| self.cache.get(k)) {
            tracing::debug!(server_name = %server, tool = %tool, "Cache hit");
            let mut result = ExecutionResult::success(&server, output);
            result.cache_hit = true;
            return Ok(result);
        }

        let timeout = timeout
            .or_else(|| config.timeout())
            .unwrap_or(self.settings.default_timeout);
        let result = self
            .call_with_retries(&supervisor, &tool, &qualified, arguments, timeout)
            .await?;

        if let Some(key) = key {
            if !result.is_error() {
                self.cache.set(key, result.output.clone(), ttl);
            }
        }
        Ok(result)
    }

    /// Apply the caller-wide and per-server limits together.
    fn admit(
        &self,
        identity: &str,
        server: &str,
        caller_limit: Option<RateLimitConfig>,
        server_limit: Option<RateLimitConfig>,
    ) -> Result<(), BridgeError> {
        let caller_key = format!("caller:{identity}");
        let server_key = format!("server:{server}:{identity}");

        let mut limits = Vec::with_capacity(2);
        if let Some(limit) = caller_limit {
            limits.push((caller_key.as_str(), limit));
        }
        if let Some(limit) = server_limit {
            limits.push((server_key.as_str(), limit));
        }
        if limits.is_empty() {
            return Ok(());
        }
        self.limiter.check_and_record_all(&limits)
    }

    async fn call_with_retries(
        &self,
        supervisor: &Arc<Supervisor>,
        tool: &str,
        qualified: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ExecutionResult, BridgeError> {
        let backoff = supervisor
            .config()
            .config()
            .backoff
            .unwrap_or(self.settings.backoff);
        let retries = self.settings.call_retries;

        let mut attempt = 0;
        loop {
            match self
                .call_once(supervisor, tool, qualified, arguments.clone(), timeout)
                .await
            {
                Err(e) if e.is_retryable() && attempt < retries => {
                    let delay = backoff.delay_for(attempt);
                    attempt += 1;
                    tracing::debug!(
                        server_name = %supervisor.name(),
                        tool = %tool,
                        attempt,
                        error = %e,
                        "Retrying tool call"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            return Err(BridgeError::connection("bridge is shutting down"));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    return Err(BridgeError::connection(format!(
                        "{qualified} failed after {} attempt(s): {e}",
                        attempt + 1
                    )));
                }
                other => return other,
            }
        }
    }

    async fn call_once(
        &self,
        supervisor: &Arc<Supervisor>,
        tool: &str,
        qualified: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ExecutionResult, BridgeError> {
        let connection = self.ensure_connected(supervisor.name()).await?;
        self.current_tools(&connection).await;
        let bound = connection
            .bind(tool)
            .ok_or_else(|| BridgeError::ToolNotFound(qualified.to_string()))?;

        let result = bound.invoke(arguments, timeout).await;
        if let Err(e) = &result {
            if e.is_retryable() || connection.is_closed() {
                self.evict(connection, Arc::clone(supervisor));
            }
        }
        result
    }

    /// Drop a dead connection from the pool and reap it in the background.
    fn evict(&self, connection: Arc<Connection>, supervisor: Arc<Supervisor>) {
        if self.pool.release(&connection) {
            tracing::debug!(server_name = %connection.server(), "Evicted dead connection");
            tokio::spawn(async move {
                let _ = supervisor.stop(&connection).await;
            });
        }
    }

    /// One health pass over `name`. Returns the resulting status.
    async fn supervise(&self, name: &str) -> ConnectionStatus {
        let Some(supervisor) = self.supervisor(name) else {
            return ConnectionStatus::Stopped;
        };
        let exited_cleanly = match self.pool.peek(name) {
            Some(connection) => {
                let status = supervisor.health_check(&connection).await;
                if status != ConnectionStatus::Stopped {
                    return status;
                }

                let exited_cleanly = connection.process_exit().await;
                self.pool.release(&connection);
                if let Err(e) = supervisor.stop(&connection).await {
                    tracing::debug!(server_name = %name, error = %e, "Stop after failed health check");
                }
                exited_cleanly
            }
            // Never started, or already evicted by a caller that found the
            // connection closed. The exit status is gone in the second case.
            None if supervisor.start_count() == 0 => return ConnectionStatus::Stopped,
            None => None,
        };

        if self.cancel.is_cancelled() {
            return ConnectionStatus::Stopped;
        }
        if !supervisor.should_restart(exited_cleanly) {
            tracing::debug!(server_name = %name, "Tool server stopped, not restarting");
            return ConnectionStatus::Stopped;
        }

        match self.ensure_connected(name).await {
            Ok(connection) => {
                tracing::info!(server_name = %name, "Tool server restarted");
                connection.status()
            }
            Err(e) => {
                tracing::warn!(server_name = %name, error = %e, "Tool server restart failed");
                ConnectionStatus::Stopped
            }
        }
    }
}

async fn health_loop(inner: Arc<BridgeInner>, name: String) {
    let cancel = inner.cancel.clone();
    let mut ticker = interval(inner.settings.health_check_interval.max(MIN_LOOP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    tracing::debug!(server_name = %name, "Starting health monitor");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                inner.supervise(&name).await;
            }
        }
    }
    tracing::debug!(server_name = %name, "Health monitor stopped");
}

async fn sweep_loop(inner: Arc<BridgeInner>) {
    let cancel = inner.cancel.clone();
    let mut ticker = interval(inner.settings.cache_sweep_interval.max(MIN_LOOP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = inner.cache.sweep();
                inner.limiter.compact();
                if removed > 0 {
                    tracing::debug!(removed, remaining = inner.cache.len(), "Swept result cache");
                }
            }
        }
    }
}

fn audit(
    tool: &str,
    caller: &str,
    server: Option<&str>,
    outcome: &Result<ExecutionResult, BridgeError>,
    latency: Duration,
) {
    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(result) => tracing::info!(
            target: AUDIT_TARGET,
            tool,
            caller,
            server,
            outcome = if result.is_error() { "tool_error" } else { "success" },
            latency_ms,
            cache_hit = result.cache_hit,
            "Tool call"
        ),
        Err(e) => tracing::info!(
            target: AUDIT_TARGET,
            tool,
            caller,
            server,
            outcome = ?e.category(),
            latency_ms,
            cache_hit = false,
            error = %e,
            "Tool call"
        ),
    }
}

fn unknown_server(name: &str) -> BridgeError {
    BridgeError::validation(format!("unknown server '{name}'"))
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
