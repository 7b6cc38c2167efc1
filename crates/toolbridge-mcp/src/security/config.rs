//! Whole-configuration validation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use toolbridge_core::{
    BridgeError, EnvProvider, Secret, ServerConfig, ServerKind, SystemEnv, TransportKind,
};

use super::command::{validate_args, validate_command};
use super::env::{inject_credentials, sanitize_env};
use super::path::validate_path;
use crate::resolver::{FsProvider, SystemFs, effective_child_path, resolve_executable};

/// How to spawn a local server. Only produced by [`SecurityValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Absolute path of the resolved launcher.
    pub program: PathBuf,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Complete child environment; nothing is inherited.
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

/// A configuration that passed every check. Immutable once built.
#[derive(Debug, Clone)]
pub struct ValidatedServerConfig {
    config: ServerConfig,
    launch: Option<LaunchSpec>,
}

impl ValidatedServerConfig {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Present for local servers.
    pub const fn launch(&self) -> Option<&LaunchSpec> {
        self.launch.as_ref()
    }

    /// Endpoint for push-stream and socket transports.
    pub fn endpoint(&self) -> Option<&str> {
        self.config.endpoint.as_deref()
    }

    /// Credentials for remote transports, sent as request headers.
    pub const fn credentials(&self) -> &BTreeMap<String, Secret> {
        &self.config.authentication
    }
}

/// Validates server configurations before anything is spawned.
#[derive(Clone)]
pub struct SecurityValidator {
    env: Arc<dyn EnvProvider>,
    fs: Arc<dyn FsProvider>,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for SecurityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityValidator").finish_non_exhaustive()
    }
}

impl SecurityValidator {
    /// Validator backed by the real environment and filesystem.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemEnv), Arc::new(SystemFs))
    }

    pub fn new(env: Arc<dyn EnvProvider>, fs: Arc<dyn FsProvider>) -> Self {
        Self { env, fs }
    }

    /// Run every structural and security check and resolve the launcher.
    pub fn validate(&self, config: ServerConfig) -> Result<ValidatedServerConfig, BridgeError> {
        config.validate()?;

        if config.transport != TransportKind::Pipe {
            validate_endpoint(config.transport, config.endpoint.as_deref().unwrap_or_default())?;
        }

        let launch = match config.kind {
            ServerKind::Local => Some(self.launch_spec(&config)?),
            ServerKind::Remote => None,
        };

        Ok(ValidatedServerConfig { config, launch })
    }

    fn launch_spec(&self, config: &ServerConfig) -> Result<LaunchSpec, BridgeError> {
        let mut tokens = validate_command(config.command.as_deref().unwrap_or_default())?;
        validate_args(&config.args)?;

        let home = self.env.get_string("HOME");
        let mut env = sanitize_env(&config.env, home.as_deref())?;
        inject_credentials(&mut env, &config.authentication)?;

        let working_directory = config
            .working_directory
            .as_deref()
            .map(|dir| validate_path(dir, false))
            .transpose()?;

        let launcher = tokens.remove(0);
        let resolved = resolve_executable(&launcher, self.env.as_ref(), self.fs.as_ref())
            .inspect_err(|e| {
                tracing::warn!(
                    server_name = %config.name,
                    launcher = %launcher,
                    attempts = %e.attempt_report(),
                    "Launcher could not be resolved"
                );
            })?;
        for warning in &resolved.warnings {
            tracing::debug!(server_name = %config.name, "{warning}");
        }

        env.insert(
            "PATH".to_string(),
            effective_child_path(&resolved.resolved_path),
        );

        tokens.extend(config.args.iter().cloned());
        Ok(LaunchSpec {
            program: resolved.resolved_path,
            args: tokens,
            env,
            working_directory,
        })
    }
}

fn validate_endpoint(transport: TransportKind, endpoint: &str) -> Result<(), BridgeError> {
    match transport {
        TransportKind::Pipe => Ok(()),
        TransportKind::PushStream => {
            let url = reqwest::Url::parse(endpoint)
                .map_err(|e| BridgeError::validation(format!("invalid endpoint URL: {e}")))?;
            if matches!(url.scheme(), "http" | "https") {
                Ok(())
            } else {
                Err(BridgeError::validation(
                    "push-stream endpoint must use http or https",
                ))
            }
        }
        TransportKind::Socket => {
            if let Some(path) = endpoint.strip_prefix("unix:") {
                return if path.starts_with('/') {
                    Ok(())
                } else {
                    Err(BridgeError::validation("unix socket path must be absolute"))
                };
            }
            let (host, port) = endpoint
                .rsplit_once(':')
                .ok_or_else(|| BridgeError::validation("socket endpoint must be host:port"))?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(BridgeError::validation("socket endpoint must be host:port"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use toolbridge_core::{MapEnv, SecurityViolation};

    use super::*;
    use crate::resolver::FakeFs;

    fn validator() -> SecurityValidator {
        let env = MapEnv::new()
            .with_var("PATH", "/usr/bin")
            .with_var("HOME", "/home/agent")
            .with_var("LD_PRELOAD", "/host/should/not/leak.so");
        let fs = FakeFs::new()
            .with_executable("/usr/bin/npx")
            .with_executable("/usr/bin/python3");
        SecurityValidator::new(Arc::new(env), Arc::new(fs))
    }

    #[test]
    fn test_local_config_produces_launch_spec() {
        let config = ServerConfig::pipe("fs", "npx -y server-fs")
            .with_args(["--root", "/data"])
            .with_env("GITHUB_TOKEN", "t")
            .with_env("UNLISTED", "dropped")
            .with_secret("SERVICE_API_KEY", "k");

        let validated = validator().validate(config).unwrap();
        let launch = validated.launch().unwrap();

        assert_eq!(launch.program, PathBuf::from("/usr/bin/npx"));
        assert_eq!(launch.args, vec!["-y", "server-fs", "--root", "/data"]);
        assert_eq!(launch.env["HOME"], "/home/agent");
        assert_eq!(launch.env["GITHUB_TOKEN"], "t");
        assert_eq!(launch.env["SERVICE_API_KEY"], "k");
        assert!(!launch.env.contains_key("UNLISTED"));
        assert!(!launch.env.contains_key("LD_PRELOAD"));
    }

    #[test]
    fn test_disallowed_launcher_fails_before_resolution() {
        let err = validator()
            .validate(ServerConfig::pipe("x", "bash -c 'id'"))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Security(SecurityViolation::DisallowedLauncher)
        ));
    }

    #[test]
    fn test_missing_launcher_is_server_error() {
        let err = validator()
            .validate(ServerConfig::pipe("x", "deno run server.ts"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Server(_)));
    }

    #[test]
    fn test_forbidden_working_directory() {
        let mut config = ServerConfig::pipe("x", "python3 -m server");
        config.working_directory = Some(PathBuf::from("/etc"));
        assert!(matches!(
            validator().validate(config),
            Err(BridgeError::Security(SecurityViolation::ForbiddenPath))
        ));
    }

    #[test]
    fn test_remote_endpoints() {
        let ok = ServerConfig::remote("r", TransportKind::PushStream, "https://tools.example/sse");
        assert!(validator().validate(ok).unwrap().launch().is_none());

        let bad_scheme = ServerConfig::remote("r", TransportKind::PushStream, "ftp://x/sse");
        assert!(validator().validate(bad_scheme).is_err());

        let socket = ServerConfig::remote("s", TransportKind::Socket, "127.0.0.1:7000");
        assert!(validator().validate(socket).is_ok());

        let unix = ServerConfig::remote("u", TransportKind::Socket, "unix:/run/tools.sock");
        assert!(validator().validate(unix).is_ok());

        let no_port = ServerConfig::remote("s", TransportKind::Socket, "localhost");
        assert!(validator().validate(no_port).is_err());
    }
}
