use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use crate::cli::{Cli, CliCommand};
use crate::daemon::DaemonError;
use tidyd_core::client::{ClientError, ConnectionManager, StreamHandler};
use tidyd_core::lifecycle::{LifecycleError, ServiceLifecycleManager, ServiceStatus};
use tidyd_core::paths;

pub mod cli;
pub mod config;
pub mod daemon;

#[derive(Debug)]
pub enum CliError {
    Lifecycle(LifecycleError),
    Client(ClientError),
    Daemon(DaemonError),
    Io(std::io::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Lifecycle(error) => write!(f, "{}", error),
            CliError::Client(error) => write!(f, "{}", error),
            CliError::Daemon(error) => write!(f, "{}", error),
            CliError::Io(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for CliError {}

impl From<LifecycleError> for CliError {
    fn from(error: LifecycleError) -> Self {
        CliError::Lifecycle(error)
    }
}

impl From<ClientError> for CliError {
    fn from(error: ClientError) -> Self {
        CliError::Client(error)
    }
}

impl From<DaemonError> for CliError {
    fn from(error: DaemonError) -> Self {
        CliError::Daemon(error)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { socket, command } = cli;

    match command {
        CliCommand::Install => {
            let manager = ServiceLifecycleManager::per_user();
            let executable = std::env::current_exe().map_err(CliError::Io)?;
            manager.install(&executable).await?;
            println!("tidyd installed and started");
            Ok(())
        }
        CliCommand::Uninstall => {
            let manager = ServiceLifecycleManager::per_user();
            manager.uninstall().await?;
            println!("tidyd uninstalled");
            Ok(())
        }
        CliCommand::Status => {
            let manager = ServiceLifecycleManager::per_user();
            match manager.status().await {
                ServiceStatus::Running => {
                    let client = connection(socket);
                    client.connect().await;
                    match client.ping().await {
                        Ok(()) => println!("running, endpoint responding"),
                        Err(error) => println!("running, endpoint not responding ({})", error),
                    }
                }
                ServiceStatus::NotRunning => println!("not running"),
            }
            Ok(())
        }
        CliCommand::Run { log_path } => {
            daemon::run_daemon(socket, log_path).await?;
            Ok(())
        }
        CliCommand::Ask { prompt } => {
            let client = connection(socket);
            client.connect().await;

            let reply = client.request(&prompt).await?;
            println!("{}", reply);
            Ok(())
        }
        CliCommand::Chat { prompt } => {
            let client = connection(socket);
            client.connect().await;

            let (done_tx, mut done_rx) = mpsc::unbounded_channel();
            client
                .request_stream(&prompt, Box::new(StdoutStream { done: done_tx }))
                .await;

            match done_rx.recv().await {
                Some(Ok(())) => {
                    println!();
                    Ok(())
                }
                Some(Err(error)) => Err(CliError::Client(error)),
                None => Err(CliError::Client(ClientError::ConnectionLost)),
            }
        }
    }
}

fn connection(socket: Option<PathBuf>) -> ConnectionManager {
    match socket {
        Some(path) => ConnectionManager::new(path, paths::callback_dir()),
        None => ConnectionManager::per_user(),
    }
}

/// Prints chunks as they arrive and reports the final result back to the
/// command handler.
struct StdoutStream {
    done: mpsc::UnboundedSender<Result<(), ClientError>>,
}

impl StreamHandler for StdoutStream {
    fn on_chunk(&mut self, chunk: String) {
        print!("{}", chunk);
        let _ = std::io::stdout().flush();
    }

    fn on_complete(self: Box<Self>, result: Result<(), ClientError>) {
        let _ = self.done.send(result);
    }
}
