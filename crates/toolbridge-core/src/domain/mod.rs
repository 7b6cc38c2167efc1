//! Domain types shared by every toolbridge crate.

mod server;
mod tool;

pub use server::{
    DEFAULT_MAX_RETRIES, RateLimitConfig, RestartPolicy, Secret, ServerConfig, ServerKind,
    TransportKind,
};
pub use tool::{
    ConnectionStatus, ExecutionResult, QUALIFIED_SEPARATOR, ServerStatusInfo, Tool,
    split_qualified,
};
