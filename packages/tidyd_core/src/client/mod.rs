//! Client side of the daemon connection.
//!
//! The primary channel is dialed fresh for every request, so "connected" is
//! a logical state rather than a held socket: a daemon that restarts or
//! comes up late is picked up on the next call without any reconnect step.
//! Streaming requests run as background sessions; starting a new stream
//! supersedes the previous session, which goes silent without completing.

pub mod callback;

use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use interprocess::local_socket::tokio::{RecvHalf, SendHalf, Stream, prelude::*};
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::callback::CallbackChannel;
use crate::paths;
use crate::wire::write_line;
use tidyd_proto::{CallbackFrame, DaemonRequest, DaemonResponse, MarshaledError, SERVICE_LABEL};

/// Connection lifecycle as observed by the client. `Connecting` is the
/// in-flight phase of `connect`; a local endpoint is treated as immediately
/// reachable, so the state lands in `Connected` before `connect` returns.
/// `Failed` does not gate anything: requests keep dialing, and the next
/// success returns the state to `Connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

#[derive(Debug)]
pub enum ClientError {
    /// No logical connection; `connect` has not been called, or
    /// `disconnect` was.
    NotConnected,
    /// Nothing reachable on the daemon endpoint.
    ProxyUnavailable(io::Error),
    /// The daemon went away mid-exchange.
    ConnectionLost,
    /// The daemon answered something outside the protocol.
    Protocol(String),
    /// The daemon itself reported a failure.
    Service(MarshaledError),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "not connected to the daemon"),
            ClientError::ProxyUnavailable(error) => {
                write!(f, "daemon endpoint unavailable: {}", error)
            }
            ClientError::ConnectionLost => write!(f, "connection to the daemon was lost"),
            ClientError::Protocol(message) => write!(f, "protocol violation: {}", message),
            ClientError::Service(error) => write!(f, "daemon error: {}", error),
        }
    }
}

impl std::error::Error for ClientError {}

/// Receiver for one streaming request.
///
/// `on_chunk` fires once per chunk in arrival order. `on_complete` consumes
/// the handler, so a session cannot complete twice; a superseded session's
/// handler is dropped without any further calls.
pub trait StreamHandler: Send + 'static {
    fn on_chunk(&mut self, chunk: String);
    fn on_complete(self: Box<Self>, result: Result<(), ClientError>);
}

/// Tracks which stream session is allowed to touch its handler. Every
/// delivery takes this lock first, so once a new session has bumped
/// `current`, an older session cannot slip another call through.
struct SessionGate {
    current: u64,
    issued: u64,
    supersede: CancellationToken,
    shutdown: CancellationToken,
}

async fn complete_session(
    gate: &Mutex<SessionGate>,
    session_id: u64,
    handler: Box<dyn StreamHandler>,
    result: Result<(), ClientError>,
) {
    let mut gate = gate.lock().await;
    if gate.current != session_id {
        return;
    }
    gate.current = 0;
    handler.on_complete(result);
}

pub struct ConnectionManager {
    endpoint: PathBuf,
    callback_dir: PathBuf,
    state: Mutex<ConnectionState>,
    gate: Arc<Mutex<SessionGate>>,
}

impl ConnectionManager {
    pub fn new(endpoint: PathBuf, callback_dir: PathBuf) -> Self {
        ConnectionManager {
            endpoint,
            callback_dir,
            state: Mutex::new(ConnectionState::Disconnected),
            gate: Arc::new(Mutex::new(SessionGate {
                current: 0,
                issued: 0,
                supersede: CancellationToken::new(),
                shutdown: CancellationToken::new(),
            })),
        }
    }

    /// Client for the standard per-user endpoint.
    pub fn per_user() -> Self {
        ConnectionManager::new(
            paths::endpoint_socket_path(SERVICE_LABEL),
            paths::callback_dir(),
        )
    }

    /// Open the logical connection. Always succeeds: nothing is dialed
    /// here, requests do their own dialing, so a daemon that is down right
    /// now only fails the calls that actually reach for it.
    pub async fn connect(&self) {
        let mut state = self.state.lock().await;
        *state = ConnectionState::Connected;
    }

    /// Close the logical connection. The active stream session, if any, is
    /// told to complete with `ConnectionLost`; requests made after this
    /// fail with `NotConnected` until `connect` is called again.
    pub async fn disconnect(&self) {
        {
            let gate = self.gate.lock().await;
            gate.shutdown.cancel();
        }
        let mut state = self.state.lock().await;
        *state = ConnectionState::Disconnected;
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    /// One-shot generation over a fresh primary connection.
    pub async fn request(&self, prompt: &str) -> Result<String, ClientError> {
        let request = DaemonRequest::Generate { prompt: prompt.to_string() };
        match self.roundtrip(request).await? {
            DaemonResponse::Generated { text } => Ok(text),
            DaemonResponse::Error { error } => Err(ClientError::Service(error)),
            other => Err(ClientError::Protocol(format!("unexpected response: {:?}", other))),
        }
    }

    /// Liveness probe against the primary endpoint.
    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.roundtrip(DaemonRequest::Ping).await? {
            DaemonResponse::Pong => Ok(()),
            other => Err(ClientError::Protocol(format!("unexpected response: {:?}", other))),
        }
    }

    /// Streaming generation. Chunks and the final completion are delivered
    /// to `handler` from a background session owned by this call; see
    /// [`StreamHandler`] for the delivery contract.
    pub async fn request_stream(&self, prompt: &str, handler: Box<dyn StreamHandler>) {
        let (session_id, supersede, shutdown) = {
            let mut gate = self.gate.lock().await;
            gate.supersede.cancel();
            gate.issued += 1;
            gate.current = gate.issued;
            gate.supersede = CancellationToken::new();
            gate.shutdown = CancellationToken::new();
            (gate.current, gate.supersede.clone(), gate.shutdown.clone())
        };

        if !self.requests_allowed().await {
            complete_session(&self.gate, session_id, handler, Err(ClientError::NotConnected)).await;
            return;
        }

        let request_id = Uuid::new_v4();
        let channel = match CallbackChannel::create(&self.callback_dir, request_id) {
            Ok(channel) => channel,
            Err(error) => {
                tracing::warn!(?error, "failed to open callback channel");
                let result = Err(ClientError::ProxyUnavailable(error));
                complete_session(&self.gate, session_id, handler, result).await;
                return;
            }
        };

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(error) => {
                self.note_endpoint_failure("daemon endpoint unreachable").await;
                let result = Err(ClientError::ProxyUnavailable(error));
                complete_session(&self.gate, session_id, handler, result).await;
                return;
            }
        };
        let (recv, mut send) = stream.split();

        let request = DaemonRequest::GenerateStream {
            prompt: prompt.to_string(),
            callback: channel.name(),
        };
        if let Err(error) = write_line(&mut send, &request).await {
            tracing::debug!(?error, "stream request write failed");
            self.note_endpoint_failure("connection lost while sending").await;
            complete_session(&self.gate, session_id, handler, Err(ClientError::ConnectionLost)).await;
            return;
        }

        let session = StreamSession {
            id: session_id,
            request_id,
            gate: self.gate.clone(),
            channel,
            handler,
            supersede,
            shutdown,
        };
        tokio::spawn(session.run(recv, send));
    }

    async fn roundtrip(&self, request: DaemonRequest) -> Result<DaemonResponse, ClientError> {
        if !self.requests_allowed().await {
            return Err(ClientError::NotConnected);
        }

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(error) => {
                self.note_endpoint_failure("daemon endpoint unreachable").await;
                return Err(ClientError::ProxyUnavailable(error));
            }
        };
        let (recv, mut send) = stream.split();

        if let Err(error) = write_line(&mut send, &request).await {
            tracing::debug!(?error, "request write failed");
            self.note_endpoint_failure("connection lost while sending").await;
            return Err(ClientError::ConnectionLost);
        }

        let mut reader = BufReader::new(recv);
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                self.note_endpoint_failure("connection closed before reply").await;
                Err(ClientError::ConnectionLost)
            }
            Ok(_) => match serde_json::from_str::<DaemonResponse>(line.trim()) {
                Ok(response) => {
                    self.note_endpoint_success().await;
                    Ok(response)
                }
                Err(error) => Err(ClientError::Protocol(error.to_string())),
            },
            Err(error) => {
                tracing::debug!(?error, "reply read failed");
                self.note_endpoint_failure("connection lost while reading reply").await;
                Err(ClientError::ConnectionLost)
            }
        }
    }

    async fn dial(&self) -> io::Result<Stream> {
        let name = self.endpoint.clone().to_fs_name::<GenericFilePath>()?;
        Stream::connect(name).await
    }

    async fn requests_allowed(&self) -> bool {
        !matches!(*self.state.lock().await, ConnectionState::Disconnected)
    }

    async fn note_endpoint_failure(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if !matches!(*state, ConnectionState::Disconnected) {
            *state = ConnectionState::Failed(reason.to_string());
        }
    }

    async fn note_endpoint_success(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, ConnectionState::Failed(_)) {
            *state = ConnectionState::Connected;
        }
    }
}

enum SessionEnd {
    Completed(Result<(), ClientError>),
    Superseded,
}

/// One in-flight streaming request: owns the callback channel, the handler,
/// and the primary connection for the stream's whole lifetime.
struct StreamSession {
    id: u64,
    request_id: Uuid,
    gate: Arc<Mutex<SessionGate>>,
    channel: CallbackChannel,
    handler: Box<dyn StreamHandler>,
    supersede: CancellationToken,
    shutdown: CancellationToken,
}

impl StreamSession {
    async fn run(mut self, primary_recv: RecvHalf, primary_send: SendHalf) {
        // Holding the send half keeps the request connection open for the
        // stream's lifetime; the daemon treats its EOF as the client going
        // away.
        let end = self.pump(primary_recv).await;
        drop(primary_send);

        match end {
            SessionEnd::Completed(result) => {
                complete_session(&self.gate, self.id, self.handler, result).await;
            }
            SessionEnd::Superseded => {
                tracing::debug!(request_id = %self.request_id, "stream session superseded");
            }
        }
    }

    async fn pump(&mut self, primary_recv: RecvHalf) -> SessionEnd {
        let callback = tokio::select! {
            accepted = self.channel.accept() => match accepted {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::warn!(?error, request_id = %self.request_id, "callback accept failed");
                    return SessionEnd::Completed(Err(ClientError::ConnectionLost));
                }
            },
            // Primary connection gone before the daemon ever dialed back:
            // the stream was interrupted before it started.
            _ = connection_closed(primary_recv) => {
                return SessionEnd::Completed(Err(ClientError::ConnectionLost));
            }
            _ = self.supersede.cancelled() => return SessionEnd::Superseded,
            _ = self.shutdown.cancelled() => {
                return SessionEnd::Completed(Err(ClientError::ConnectionLost));
            }
        };

        let (callback_recv, _callback_send) = callback.split();
        let mut reader = BufReader::new(callback_recv);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                _ = self.supersede.cancelled() => return SessionEnd::Superseded,
                _ = self.shutdown.cancelled() => {
                    return SessionEnd::Completed(Err(ClientError::ConnectionLost));
                }
            };

            match read {
                // EOF without a completion frame is the implicit completion:
                // the daemon died or dropped the stream.
                Ok(0) => return SessionEnd::Completed(Err(ClientError::ConnectionLost)),
                Ok(_) => {}
                Err(error) => {
                    tracing::debug!(?error, request_id = %self.request_id, "callback read failed");
                    return SessionEnd::Completed(Err(ClientError::ConnectionLost));
                }
            }

            let frame = match serde_json::from_str::<CallbackFrame>(line.trim()) {
                Ok(frame) => frame,
                Err(error) => {
                    tracing::warn!(?error, request_id = %self.request_id, "malformed callback frame");
                    return SessionEnd::Completed(Err(ClientError::ConnectionLost));
                }
            };

            match frame {
                CallbackFrame::Chunk { text } => {
                    if !self.deliver_chunk(text).await {
                        return SessionEnd::Superseded;
                    }
                }
                CallbackFrame::Completion { error } => {
                    return SessionEnd::Completed(match error {
                        None => Ok(()),
                        Some(error) => Err(ClientError::Service(error)),
                    });
                }
            }
        }
    }

    /// Deliver one chunk under the gate; false means this session has been
    /// superseded and the chunk was discarded. The gate stays held across
    /// the handler call, so supersession can never interleave with it.
    async fn deliver_chunk(&mut self, text: String) -> bool {
        let gate = self.gate.lock().await;
        if gate.current != self.id {
            return false;
        }
        self.handler.on_chunk(text);
        true
    }
}

/// Resolves once the peer closes the connection. Bytes are drained and
/// ignored; the daemon never sends stream data on the primary channel.
async fn connection_closed(mut recv: RecvHalf) {
    let mut sink = [0u8; 64];
    loop {
        match recv.read(&mut sink).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
