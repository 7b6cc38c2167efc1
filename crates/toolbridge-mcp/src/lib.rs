#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

pub mod cache;
pub mod connection;
pub mod launcher;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod rate_limit;
pub mod resolver;
pub mod security;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

mod lock;

// Re-export domain types from core for convenience
pub use toolbridge_core::{
    AllowAllPolicy, BridgeError, BridgeSettings, CallerPolicy, CallerPolicyPort,
    ConnectionStatus, ExecutionResult, ServerConfig, ServerStatusInfo, StaticPolicyProvider, Tool,
};

// Re-export this crate's public types
pub use connection::{BoundTool, Connection};
pub use launcher::{LaunchOptions, LaunchedServer, Launcher, ProcessLauncher, ServerProcess};
pub use manager::{AUDIT_TARGET, InitReport, ShutdownReport, ToolBridge, ToolBridgeBuilder};
pub use security::{SecurityValidator, ValidatedServerConfig};
pub use transport::{Transport, TransportLimits};
