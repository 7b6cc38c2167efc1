//! Validate command handler.
//!
//! Runs every configuration through the same checks the bridge applies at
//! initialization, without starting anything.

use std::collections::HashSet;

use anyhow::Result;
use toolbridge_core::{BridgeError, ServerKind, SystemEnv, apply_server_overrides};
use toolbridge_mcp::{SecurityValidator, ValidatedServerConfig};

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{print_separator, truncate_string};

pub fn execute(ctx: &CliContext) -> Result<()> {
    if ctx.servers.is_empty() {
        println!("No servers configured.");
        return Ok(());
    }

    let validator = SecurityValidator::system();
    let mut seen = HashSet::new();
    let mut invalid = 0;

    println!("{:<20} {:<7} {:<12} Result", "Server", "Kind", "Transport");
    print_separator(90);

    for config in &ctx.servers {
        let mut config = config.clone();
        apply_server_overrides(&mut config, &SystemEnv);

        let kind = match config.kind {
            ServerKind::Local => "local",
            ServerKind::Remote => "remote",
        };
        let transport = config.transport.to_string();
        let name = config.name.clone();

        let outcome = if seen.insert(name.clone()) {
            validator.validate(config)
        } else {
            Err(BridgeError::validation("duplicate server name"))
        };
        let summary = match &outcome {
            Ok(validated) => format!("ok  {}", target(validated)),
            Err(e) => {
                invalid += 1;
                format!("err {e}")
            }
        };

        println!(
            "{:<20} {:<7} {:<12} {}",
            truncate_string(&name, 19),
            kind,
            transport,
            summary
        );
    }

    if invalid > 0 {
        return Err(CliError::Config(format!(
            "{invalid} of {} server(s) invalid",
            ctx.servers.len()
        ))
        .into());
    }
    Ok(())
}

/// The resolved program for local servers, the endpoint for remote ones.
fn target(validated: &ValidatedServerConfig) -> String {
    match validated.launch() {
        Some(launch) => launch.program.display().to_string(),
        None => validated.endpoint().unwrap_or("--").to_string(),
    }
}
