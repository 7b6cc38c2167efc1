//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Run and inspect MCP tool servers from the command line.
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Run and inspect MCP tool servers")]
#[command(version)]
pub struct Cli {
    /// Server configuration file (`{"servers": [...]}`)
    #[arg(short, long, env = "TOOLBRIDGE_CONFIG", global = true, default_value = "toolbridge.json")]
    pub config: PathBuf,

    /// Caller identity used for policy checks and rate limits
    #[arg(long, env = "TOOLBRIDGE_CALLER", global = true, default_value = "cli")]
    pub caller: String,

    /// Caller policy file; every tool is allowed when omitted
    #[arg(long, env = "TOOLBRIDGE_POLICY", global = true)]
    pub policy: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from([
            "toolbridge",
            "--config",
            "/tmp/servers.json",
            "--caller",
            "ops",
            "tools",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/servers.json"));
        assert_eq!(cli.caller, "ops");
        assert!(cli.policy.is_none());
        assert!(matches!(cli.command, Commands::Tools { connect_all: false }));
    }

    #[test]
    fn test_call_args() {
        let cli = Cli::parse_from([
            "toolbridge",
            "call",
            "fs:read_file",
            "--args",
            r#"{"path": "/tmp/x"}"#,
            "--timeout",
            "5",
        ]);
        match cli.command {
            Commands::Call {
                tool,
                args,
                timeout,
            } => {
                assert_eq!(tool, "fs:read_file");
                assert_eq!(args.as_deref(), Some(r#"{"path": "/tmp/x"}"#));
                assert_eq!(timeout, Some(5));
            }
            _ => panic!("expected call"),
        }
    }
}
