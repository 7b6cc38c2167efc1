//! Per-server lifecycle: start with retries, health checks, stop.
//!
//! State machine: `Stopped → Starting → Healthy ⇄ Degraded → Stopped`.
//! The supervisor never restarts on its own; the manager's health loop asks
//! [`Supervisor::should_restart`] and calls [`Supervisor::start`] again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use toolbridge_core::{BackoffPolicy, BridgeError, BridgeSettings, ConnectionStatus};

use crate::connection::Connection;
use crate::launcher::{LaunchOptions, Launcher};
use crate::security::ValidatedServerConfig;
use crate::transport::TransportLimits;

/// Consecutive failed health checks before a connection is considered
/// stopped.
pub const HEALTH_FAILURE_LIMIT: u32 = 3;

/// Timeouts the supervisor applies, taken from [`BridgeSettings`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimeouts {
    pub handshake: Duration,
    pub health_check: Duration,
    pub shutdown_grace: Duration,
}

impl From<&BridgeSettings> for SupervisorTimeouts {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            handshake: settings.handshake_timeout,
            health_check: settings.health_check_timeout,
            shutdown_grace: settings.shutdown_grace,
        }
    }
}

/// Manages the lifecycle of one configured server.
pub struct Supervisor {
    server: Arc<ValidatedServerConfig>,
    launcher: Arc<dyn Launcher>,
    backoff: BackoffPolicy,
    limits: TransportLimits,
    timeouts: SupervisorTimeouts,
    cancel: CancellationToken,
    start_count: AtomicU32,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("server", &self.server.name())
            .field("start_count", &self.start_count())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(
        server: Arc<ValidatedServerConfig>,
        launcher: Arc<dyn Launcher>,
        settings: &BridgeSettings,
        cancel: CancellationToken,
    ) -> Self {
        let backoff = server.config().backoff.unwrap_or(settings.backoff);
        Self {
            server,
            launcher,
            backoff,
            limits: TransportLimits::new(settings.max_message_bytes),
            timeouts: SupervisorTimeouts::from(settings),
            cancel,
            start_count: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn config(&self) -> &ValidatedServerConfig {
        &self.server
    }

    /// Successful starts so far.
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Launch the server and complete the handshake.
    ///
    /// Failed attempts are retried up to `max_retries` times with backoff.
    /// Security errors are returned immediately. When every attempt fails
    /// the result is `BridgeError::Server`.
    pub async fn start(&self) -> Result<Arc<Connection>, BridgeError> {
        let max_retries = self.server.config().max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay_for(attempt - 1);
                tracing::debug!(
                    server_name = %self.name(),
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying server start"
                );
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        return Err(BridgeError::connection("bridge is shutting down"));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            match self.start_once().await {
                Ok(connection) => {
                    let count = self.start_count.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(
                        server_name = %self.name(),
                        start_count = count,
                        tool_count = connection.tools().len(),
                        "Tool server started"
                    );
                    return Ok(connection);
                }
                Err(e @ BridgeError::Security(_)) => {
                    tracing::warn!(server_name = %self.name(), error = %e, "Start rejected");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        server_name = %self.name(),
                        attempt,
                        error = %e,
                        "Server start failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let attempts = max_retries + 1;
        Err(BridgeError::server(match last_error {
            Some(e) => format!(
                "server '{}' failed to start after {attempts} attempt(s): {}",
                self.name(),
                e.user_message()
            ),
            None => format!("server '{}' failed to start", self.name()),
        }))
    }

    async fn start_once(&self) -> Result<Arc<Connection>, BridgeError> {
        let options = LaunchOptions {
            limits: self.limits,
            connect_timeout: self.timeouts.handshake,
        };
        let launched = self.launcher.launch(&self.server, options).await?;
        Connection::open(
            self.name(),
            launched,
            &self.cancel,
            self.timeouts.handshake,
        )
        .await
    }

    /// Probe a connection and record the outcome.
    ///
    /// A dead process stops the connection at once; otherwise the first
    /// failed `ping` degrades it and [`HEALTH_FAILURE_LIMIT`] consecutive
    /// failures stop it.
    pub async fn health_check(&self, connection: &Connection) -> ConnectionStatus {
        if connection.is_closed() {
            return connection.record_health(false, 1);
        }
        if let Some(success) = connection.process_exit().await {
            tracing::warn!(server_name = %self.name(), success, "Tool server process exited");
            return connection.record_health(false, 1);
        }

        let result = connection.ping(self.timeouts.health_check).await;
        if let Err(e) = &result {
            tracing::debug!(server_name = %self.name(), error = %e, "Health check failed");
        }
        let status = connection.record_health(result.is_ok(), HEALTH_FAILURE_LIMIT);
        if status != ConnectionStatus::Healthy {
            tracing::warn!(server_name = %self.name(), %status, "Tool server unhealthy");
        }
        status
    }

    /// Stop a connection and its process.
    pub async fn stop(&self, connection: &Connection) -> Result<(), BridgeError> {
        tracing::info!(server_name = %self.name(), "Stopping tool server");
        connection.close(self.timeouts.shutdown_grace).await
    }

    /// Whether the restart policy allows bringing a stopped server back.
    ///
    /// `exited_cleanly` is `Some(true)` only when the process exited with
    /// success on its own; health failures count as failures.
    pub fn should_restart(&self, exited_cleanly: Option<bool>) -> bool {
        let failed = exited_cleanly != Some(true);
        self.server.config().restart_policy.should_restart(failed)
    }
}
