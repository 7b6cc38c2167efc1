#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod backoff;
pub mod config_file;
pub mod domain;
pub mod error;
pub mod pattern;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use backoff::BackoffPolicy;
pub use config_file::{ServersFile, load_server_configs, parse_server_configs};
pub use domain::{
    ConnectionStatus, ExecutionResult, RateLimitConfig, RestartPolicy, Secret, ServerConfig,
    ServerKind, ServerStatusInfo, Tool, TransportKind, split_qualified,
};
pub use error::{BridgeError, ErrorCategory, SecurityViolation};
pub use ports::{
    AllowAllPolicy, CallerPolicy, CallerPolicyPort, EnvProvider, MapEnv, StaticPolicyProvider,
    SystemEnv,
};
pub use settings::{BridgeSettings, apply_server_overrides};
