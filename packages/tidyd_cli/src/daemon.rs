//! Foreground daemon entry: logging, configuration, the request
//! dispatcher, folder watchers, and signal-driven shutdown.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{ConfigError, DaemonConfig};
use tidyd_core::paths;
use tidyd_core::service::{EchoEngine, EngineHost, FolderWatcher, RequestDispatcher};
use tidyd_proto::SERVICE_LABEL;

pub const LOG_ENV_VAR: &str = "TIDYD_LOG";

#[derive(Debug)]
pub enum DaemonError {
    Config(ConfigError),
    Endpoint(std::io::Error),
}

impl Display for DaemonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::Config(error) => write!(f, "{}", error),
            DaemonError::Endpoint(error) => write!(f, "failed to serve endpoint: {}", error),
        }
    }
}

impl std::error::Error for DaemonError {}

pub async fn run_daemon(
    socket: Option<PathBuf>,
    log_path: Option<PathBuf>,
) -> Result<(), DaemonError> {
    let _log_guard = init_logging(log_path.as_deref());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tidyd daemon starting");

    let config = match DaemonConfig::load(&paths::config_path()) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "failed to load configuration");
            return Err(DaemonError::Config(error));
        }
    };

    let endpoint = socket.unwrap_or_else(|| paths::endpoint_socket_path(SERVICE_LABEL));
    let cancel = CancellationToken::new();
    let engine = Arc::new(EngineHost::new(Box::new(EchoEngine), config.history_pairs));

    let dispatcher = RequestDispatcher::new(endpoint, engine.clone(), cancel.clone());
    let mut dispatch_handle = tokio::spawn(dispatcher.run());

    let mut watcher_handles = Vec::new();
    for dir in &config.watch {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "watch path is not a directory, skipping");
            continue;
        }
        let watcher = FolderWatcher::new(dir.clone(), engine.clone());
        watcher_handles.push(tokio::spawn(watcher.run(cancel.child_token())));
    }

    let mut failure = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = terminate_signal() => {
            tracing::info!("received terminate signal, shutting down");
        }
        result = &mut dispatch_handle => {
            match result {
                Ok(Ok(())) => tracing::info!("dispatcher stopped"),
                Ok(Err(error)) => {
                    tracing::error!(%error, "dispatcher failed");
                    failure = Some(DaemonError::Endpoint(error));
                }
                Err(join_error) => tracing::error!(?join_error, "dispatcher task panicked"),
            }
        }
    }

    cancel.cancel();
    let drain = async {
        if !dispatch_handle.is_finished() {
            let _ = (&mut dispatch_handle).await;
        }
        for handle in watcher_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        tracing::warn!("shutdown timed out waiting for tasks");
    }

    tracing::info!("daemon stopped");
    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::error!(?error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

fn init_logging(log_path: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_path {
        Some(path) => {
            let (dir, file) = match (path.parent(), path.file_name()) {
                (Some(dir), Some(file)) if !dir.as_os_str().is_empty() => {
                    (dir.to_path_buf(), file.to_os_string())
                }
                (_, Some(file)) => (PathBuf::from("."), file.to_os_string()),
                _ => (PathBuf::from("."), std::ffi::OsString::from("tidyd.log")),
            };
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}
