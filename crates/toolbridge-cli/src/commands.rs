//! Subcommands.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Check every server configuration without starting anything
    Validate,

    /// List the tools available to the caller
    Tools {
        /// Start every configured server first, not only `auto_start` ones
        #[arg(long)]
        connect_all: bool,
    },

    /// Call one tool and print its output
    Call {
        /// Tool name, `server:tool` or an unambiguous unqualified name
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
        /// Call timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Start every server and show its health
    Status,
}
