use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    /// Override the primary endpoint socket path (development setups).
    #[arg(long)]
    pub socket: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Clone, Subcommand)]
pub enum CliCommand {
    /// Install the daemon under the user service supervisor and start it.
    #[command(name = "install")]
    Install,
    /// Stop the daemon and remove it from the supervisor.
    #[command(name = "uninstall")]
    Uninstall,
    /// Show supervisor registration and endpoint liveness.
    #[command(name = "status")]
    Status,
    /// Run the daemon in the foreground. This is what the supervisor launches.
    #[command(name = "run")]
    Run {
        /// Write logs to this file instead of stderr.
        #[arg(long)]
        log_path: Option<PathBuf>,
    },
    /// Send one prompt and print the full reply.
    #[command(name = "ask")]
    Ask { prompt: String },
    /// Send one prompt and print the reply as it streams in.
    #[command(name = "chat")]
    Chat { prompt: String },
}
