//! Launching tool servers.
//!
//! A [`Launcher`] turns a [`ValidatedServerConfig`] into a live transport,
//! spawning a child process for local servers. [`ProcessLauncher`] is the
//! production implementation; tests substitute in-memory servers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use toolbridge_core::{BridgeError, TransportKind};

use crate::security::{LaunchSpec, ValidatedServerConfig};
use crate::shutdown::shutdown_child;
use crate::transport::{Transport, TransportLimits};

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options passed to every launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchOptions {
    pub limits: TransportLimits,
    /// Upper bound for opening a network transport.
    pub connect_timeout: Duration,
}

/// A process backing a connection.
#[async_trait]
pub trait ServerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// `Some(success)` once the process has exited. Never blocks.
    fn exit_status(&mut self) -> Option<bool>;

    /// Stop the process, escalating after `grace`, and reap it.
    async fn terminate(&mut self, grace: Duration) -> Result<(), BridgeError>;
}

/// A freshly launched server: its transport and, for local servers, the
/// process behind it.
pub struct LaunchedServer {
    pub transport: Transport,
    pub process: Option<Box<dyn ServerProcess>>,
}

impl LaunchedServer {
    pub const fn remote(transport: Transport) -> Self {
        Self {
            transport,
            process: None,
        }
    }
}

/// Creates transports for validated server configurations.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        server: &ValidatedServerConfig,
        options: LaunchOptions,
    ) -> Result<LaunchedServer, BridgeError>;
}

/// Spawns local servers as child processes and connects to remote ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        server: &ValidatedServerConfig,
        options: LaunchOptions,
    ) -> Result<LaunchedServer, BridgeError> {
        let transport_kind = server.config().transport;

        let Some(spec) = server.launch() else {
            let transport =
                tokio::time::timeout(options.connect_timeout, connect_remote(server, options))
                    .await
                    .map_err(|_| BridgeError::Timeout(options.connect_timeout))??;
            return Ok(LaunchedServer::remote(transport));
        };

        let mut child = spawn(server.name(), spec, transport_kind == TransportKind::Pipe)?;
        forward_stderr(server.name(), &mut child);

        if transport_kind == TransportKind::Pipe {
            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                return Err(BridgeError::server("child process has no stdio pipes"));
            };
            return Ok(LaunchedServer {
                transport: Transport::pipe(stdout, stdin, options.limits),
                process: Some(Box::new(ChildProcess::new(server.name(), child))),
            });
        }

        // Local server listening on a socket or HTTP endpoint: poll until it
        // accepts connections.
        let deadline = tokio::time::Instant::now() + options.connect_timeout;
        let mut process = ChildProcess::new(server.name(), child);
        loop {
            let err = match connect_remote(server, options).await {
                Ok(transport) => {
                    return Ok(LaunchedServer {
                        transport,
                        process: Some(Box::new(process)),
                    });
                }
                Err(e) => e,
            };
            if tokio::time::Instant::now() >= deadline || process.exit_status().is_some() {
                let _ = process.terminate(Duration::ZERO).await;
                return Err(err);
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }
    }
}

async fn connect_remote(
    server: &ValidatedServerConfig,
    options: LaunchOptions,
) -> Result<Transport, BridgeError> {
    let endpoint = server
        .endpoint()
        .ok_or_else(|| BridgeError::validation("endpoint is required"))?;
    match server.config().transport {
        TransportKind::Socket => Transport::connect_socket(endpoint, options.limits).await,
        TransportKind::PushStream => {
            Transport::connect_push_stream(endpoint, server.credentials(), options.limits).await
        }
        TransportKind::Pipe => Err(BridgeError::validation(
            "pipe transport requires a local server",
        )),
    }
}

fn spawn(server_name: &str, spec: &LaunchSpec, piped_stdio: bool) -> Result<Child, BridgeError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .envs(&spec.env)
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if piped_stdio {
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null()).stdout(Stdio::null());
    }

    if let Some(dir) = &spec.working_directory {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| {
        BridgeError::server(format!("failed to spawn server process: {}", e.kind()))
    })?;

    tracing::info!(
        server_name = %server_name,
        pid = child.id(),
        "Spawned tool server"
    );
    Ok(child)
}

fn forward_stderr(server_name: &str, child: &mut Child) {
    let Some(stderr) = child.stderr.take() else {
        return;
    };
    let server_name = server_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(text)) = lines.next_line().await {
            tracing::debug!(server_name = %server_name, "stderr: {}", text);
        }
        tracing::trace!(server_name = %server_name, "stderr reader task exiting");
    });
}

/// A spawned child process.
pub struct ChildProcess {
    server_name: String,
    child: Child,
}

impl ChildProcess {
    pub fn new(server_name: impl Into<String>, child: Child) -> Self {
        Self {
            server_name: server_name.into(),
            child,
        }
    }
}

#[async_trait]
impl ServerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn exit_status(&mut self) -> Option<bool> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.success()),
            Ok(None) => None,
            // Cannot observe the child any more; treat it as gone.
            Err(_) => Some(false),
        }
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), BridgeError> {
        match shutdown_child(&mut self.child, grace).await {
            Ok(status) => {
                tracing::debug!(
                    server_name = %self.server_name,
                    exit_code = status.code(),
                    "Tool server process exited"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    server_name = %self.server_name,
                    error = %e,
                    "Failed to stop tool server process"
                );
                Err(BridgeError::server(format!(
                    "failed to stop server process: {}",
                    e.kind()
                )))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            program: PathBuf::from(program),
            args: args.iter().map(ToString::to_string).collect(),
            env: BTreeMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn test_spawned_child_sees_only_sanitized_env() {
        let Ok(env_path) = which_env() else {
            return;
        };
        let mut child = spawn("probe", &spec(&env_path, &[]), true).unwrap();
        let mut stdout = child.stdout.take().unwrap();
        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stdout, &mut out)
            .await
            .unwrap();
        child.wait().await.unwrap();

        assert_eq!(out.trim(), "PATH=/usr/bin:/bin");
    }

    #[tokio::test]
    async fn test_child_process_exit_status_and_terminate() {
        let child = spawn("sleeper", &spec("/bin/sleep", &["30"]), false).unwrap();
        let mut process = ChildProcess::new("sleeper", child);
        assert!(process.id().is_some());
        assert_eq!(process.exit_status(), None);

        process.terminate(Duration::from_millis(100)).await.unwrap();
        assert_eq!(process.exit_status(), Some(false));
    }

    fn which_env() -> Result<String, ()> {
        ["/usr/bin/env", "/bin/env"]
            .into_iter()
            .find(|p| std::path::Path::new(p).exists())
            .map(str::to_string)
            .ok_or(())
    }
}
