//! Tools command handler.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::handlers::{start_bridge, stop_bridge};
use crate::presentation::{print_separator, truncate_string};

/// List the tools the caller may use.
///
/// Only connected servers contribute tools, so without `connect_all` the
/// list covers `auto_start` servers alone.
pub async fn execute(ctx: &CliContext, connect_all: bool) -> Result<()> {
    start_bridge(ctx, connect_all).await;
    let tools = ctx.bridge.list_tools(&ctx.caller).await;
    stop_bridge(ctx).await;
    let tools = tools.map_err(CliError::from)?;

    if tools.is_empty() {
        println!("No tools available.");
        if !connect_all {
            println!("Servers start on first use; pass --connect-all to start them now.");
        }
        return Ok(());
    }

    println!("Found {} tool(s):\n", tools.len());
    println!("{:<40} Description", "Tool");
    print_separator(100);
    for tool in tools {
        println!(
            "{:<40} {}",
            truncate_string(&tool.qualified_name(), 39),
            truncate_string(tool.description.as_deref().unwrap_or("--"), 59)
        );
    }
    Ok(())
}
