//! Command handlers. Each takes the composed [`CliContext`] and returns
//! `anyhow::Result`.
//!
//! [`CliContext`]: crate::bootstrap::CliContext

pub mod call;
pub mod status;
pub mod tools;
pub mod validate;

use crate::bootstrap::CliContext;

/// Initialize the bridge and report problems on stderr.
///
/// With `connect_all`, every registered server is started, not only the
/// `auto_start` ones. Start failures are reported but not fatal.
pub(crate) async fn start_bridge(ctx: &CliContext, connect_all: bool) {
    let report = ctx.bridge.initialize(ctx.servers.clone()).await;
    for (name, error) in &report.rejected {
        eprintln!("warning: server '{name}' rejected: {error}");
    }
    for (name, error) in &report.failed {
        eprintln!("warning: server '{name}' failed to start: {}", error.user_message());
    }

    if connect_all {
        for name in &report.registered {
            if report.started.contains(name) {
                continue;
            }
            if let Err(error) = ctx.bridge.connect(name).await {
                eprintln!("warning: server '{name}' failed to start: {}", error.user_message());
            }
        }
    }
}

/// Stop everything, reporting failures on stderr.
pub(crate) async fn stop_bridge(ctx: &CliContext) {
    let report = ctx.bridge.shutdown().await;
    for (name, error) in &report.failed {
        eprintln!("warning: server '{name}' did not stop cleanly: {error}");
    }
}
