//! CLI bootstrap - the composition root.
//!
//! This module is the only place where the CLI wires concrete
//! implementations together: settings from the process environment, server
//! configurations from disk, the caller policy, and the [`ToolBridge`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use toolbridge_core::{
    AllowAllPolicy, BridgeSettings, CallerPolicyPort, ServerConfig, StaticPolicyProvider,
    SystemEnv, load_server_configs,
};
use toolbridge_mcp::ToolBridge;

/// Bootstrap configuration for the CLI.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub config_path: PathBuf,
    pub policy_path: Option<PathBuf>,
    pub caller: String,
}

/// Everything a command handler needs.
pub struct CliContext {
    pub bridge: ToolBridge,
    /// Server configurations as read from disk, before overrides.
    pub servers: Vec<ServerConfig>,
    pub caller: String,
}

/// Build the bridge. Nothing is started until a handler calls
/// `initialize`.
pub fn bootstrap(config: CliConfig) -> Result<CliContext> {
    let settings = BridgeSettings::from_env(&SystemEnv);
    let servers = load_server_configs(&config.config_path)
        .with_context(|| format!("loading {}", config.config_path.display()))?;
    let policy = load_policy(config.policy_path.as_deref())?;

    tracing::debug!(
        servers = servers.len(),
        enabled = settings.enabled,
        "Bootstrapped tool bridge"
    );

    Ok(CliContext {
        bridge: ToolBridge::new(settings, policy),
        servers,
        caller: config.caller,
    })
}

/// Read a [`StaticPolicyProvider`] from JSON, or allow everything.
pub fn load_policy(path: Option<&Path>) -> Result<Arc<dyn CallerPolicyPort>> {
    let Some(path) = path else {
        return Ok(Arc::new(AllowAllPolicy));
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading policy file {}", path.display()))?;
    let provider: StaticPolicyProvider = serde_json::from_str(&json)
        .with_context(|| format!("parsing policy file {}", path.display()))?;
    provider
        .validate()
        .with_context(|| format!("invalid policy file {}", path.display()))?;
    Ok(Arc::new(provider))
}
