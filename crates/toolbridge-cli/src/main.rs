//! CLI entry point.
//!
//! Parses arguments, wires the bridge through [`bootstrap`], and maps
//! failures to exit codes.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use toolbridge_cli::{Cli, CliConfig, CliError, Commands, bootstrap, handlers};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so tool output stays clean on stdout
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = bootstrap(CliConfig {
        config_path: cli.config,
        policy_path: cli.policy,
        caller: cli.caller,
    })?;

    match cli.command {
        Commands::Validate => handlers::validate::execute(&ctx)?,
        Commands::Tools { connect_all } => handlers::tools::execute(&ctx, connect_all).await?,
        Commands::Call {
            tool,
            args,
            timeout,
        } => handlers::call::execute(&ctx, &tool, args.as_deref(), timeout).await?,
        Commands::Status => handlers::status::execute(&ctx).await?,
    }
    Ok(())
}
