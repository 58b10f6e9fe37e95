//! Daemon side of the primary channel: accept loop, request routing, and
//! per-stream callback delivery.

use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::tokio::{Stream, prelude::*};
use interprocess::local_socket::{GenericFilePath, ListenerOptions, ToFsName};
use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::service::engine::{EngineHost, GenerationError};
use crate::wire::write_line;
use tidyd_proto::{CallbackFrame, DaemonRequest, DaemonResponse, MarshaledError};

pub struct RequestDispatcher {
    endpoint: PathBuf,
    engine: Arc<EngineHost>,
    cancel: CancellationToken,
}

impl RequestDispatcher {
    pub fn new(endpoint: PathBuf, engine: Arc<EngineHost>, cancel: CancellationToken) -> Self {
        RequestDispatcher { endpoint, engine, cancel }
    }

    /// Bind the endpoint and serve until cancelled. Refuses to start when
    /// another daemon already answers on the endpoint; a stale socket file
    /// left behind by a crashed daemon is replaced.
    pub async fn run(self) -> std::io::Result<()> {
        if let Some(parent) = self.endpoint.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let probe = self.endpoint.clone().to_fs_name::<GenericFilePath>()?;
        if Stream::connect(probe).await.is_ok() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "endpoint already served by another daemon",
            ));
        }
        let _ = std::fs::remove_file(&self.endpoint);

        let name = self.endpoint.clone().to_fs_name::<GenericFilePath>()?;
        let listener = ListenerOptions::new().name(name).create_tokio()?;
        tracing::info!(endpoint = %self.endpoint.display(), "serving primary endpoint");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok(stream) => {
                            let engine = self.engine.clone();
                            let connection_cancel = self.cancel.child_token();
                            tokio::spawn(async move {
                                if let Err(error) = handle_connection(engine, stream, connection_cancel).await {
                                    tracing::warn!(?error, "connection handler failed");
                                }
                            });
                        }
                        Err(error) => {
                            tracing::error!(?error, "failed to accept connection");
                        }
                    }
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        tracing::info!("primary endpoint shutting down");
        let _ = std::fs::remove_file(&self.endpoint);
        Ok(())
    }
}

/// One client connection: read request lines, answer on the same
/// connection. Stream requests only borrow this connection for the request
/// line itself; their data goes out through the named callback socket.
async fn handle_connection(
    engine: Arc<EngineHost>,
    stream: Stream,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (recv, send) = stream.split();
    let mut reader = BufReader::new(recv);
    let mut writer = BufWriter::new(send);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read,
            _ = cancel.cancelled() => return Ok(()),
        };
        if read? == 0 {
            return Ok(());
        }

        let request = match serde_json::from_str::<DaemonRequest>(line.trim()) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(?error, "malformed request line, closing connection");
                return Ok(());
            }
        };

        match request {
            DaemonRequest::Ping => {
                write_line(&mut writer, &DaemonResponse::Pong).await?;
            }
            DaemonRequest::Generate { prompt } => {
                let response = match engine.chat(&prompt).await {
                    Ok(text) => DaemonResponse::Generated { text },
                    Err(error) => {
                        tracing::error!(%error, "generation failed");
                        DaemonResponse::Error { error: MarshaledError::from(&error) }
                    }
                };
                write_line(&mut writer, &response).await?;
            }
            DaemonRequest::GenerateStream { prompt, callback } => {
                tracing::debug!(callback = %callback, "starting streamed generation");
                tokio::spawn(run_stream(
                    engine.clone(),
                    prompt,
                    callback,
                    cancel.child_token(),
                ));
            }
        }
    }
}

/// Deliver one streamed generation over the client's callback socket.
/// Chunks go out in production order; the completion frame is written after
/// the last chunk or not at all. The client tearing the socket down is the
/// cancellation signal, there is no cancel message.
async fn run_stream(
    engine: Arc<EngineHost>,
    prompt: String,
    callback: String,
    cancel: CancellationToken,
) {
    let stream = match dial_callback(&callback).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::warn!(?error, callback = %callback, "cannot reach callback channel");
            return;
        }
    };
    let (_recv, send) = stream.split();
    let mut writer = BufWriter::new(send);

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(32);
    let generation = tokio::spawn(async move { engine.chat_stream(&prompt, chunk_tx).await });

    let mut abandoned = false;
    loop {
        let chunk = tokio::select! {
            chunk = chunk_rx.recv() => chunk,
            _ = cancel.cancelled() => {
                // Shutting down mid-stream: drop the connection without a
                // completion, the client reads that as an interruption.
                abandoned = true;
                break;
            }
        };
        let Some(chunk) = chunk else { break };

        if let Err(error) = write_line(&mut writer, &CallbackFrame::Chunk { text: chunk }).await {
            tracing::info!(?error, "callback channel closed by client, dropping stream");
            abandoned = true;
            break;
        }
    }

    if abandoned {
        // generation keeps running detached so the exchange still lands in
        // history once it finishes
        return;
    }

    let result = match generation.await {
        Ok(result) => result,
        Err(join_error) => {
            tracing::error!(?join_error, "generation task failed");
            Err(GenerationError::Failed("generation task failed".to_string()))
        }
    };

    let completion = match result {
        Ok(()) => CallbackFrame::Completion { error: None },
        Err(error) => {
            tracing::error!(%error, "streamed generation failed");
            CallbackFrame::Completion { error: Some(MarshaledError::from(&error)) }
        }
    };
    if let Err(error) = write_line(&mut writer, &completion).await {
        tracing::warn!(?error, "failed to deliver completion frame");
    }
}

async fn dial_callback(callback: &str) -> std::io::Result<Stream> {
    let name = callback.to_string().to_fs_name::<GenericFilePath>()?;
    Stream::connect(name).await
}
