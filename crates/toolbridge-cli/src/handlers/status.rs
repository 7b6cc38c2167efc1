//! Status command handler.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::handlers::{start_bridge, stop_bridge};
use crate::presentation::{format_optional, print_separator, truncate_string};

/// Start every server, probe it once, and print a status table.
pub async fn execute(ctx: &CliContext) -> Result<()> {
    start_bridge(ctx, true).await;
    for name in ctx.bridge.server_names() {
        if let Err(e) = ctx.bridge.check_health(&name).await {
            tracing::debug!(server_name = %name, error = %e, "Health check failed");
        }
    }
    let status = ctx.bridge.status();
    stop_bridge(ctx).await;
    let status = status.map_err(CliError::from)?;

    println!(
        "{:<20} {:<10} {:<6} {:<7} Last check",
        "Server", "Status", "Tools", "Starts"
    );
    print_separator(72);
    for server in status {
        let last_check = server
            .last_health_check
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        println!(
            "{:<20} {:<10} {:<6} {:<7} {}",
            truncate_string(&server.name, 19),
            server.status,
            server.tool_count,
            server.start_count,
            format_optional(last_check.as_ref(), "--")
        );
    }
    Ok(())
}
