use serde::{Deserialize, Serialize};

use crate::error::MarshaledError;

/// Requests a client sends over the primary channel, one JSON line each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    Ping,
    Generate {
        prompt: String,
    },
    /// Streamed generation. The reply does not come back on this channel:
    /// the daemon connects to the callback socket named here and pushes
    /// [`CallbackFrame`]s until the stream is done.
    GenerateStream {
        prompt: String,
        callback: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    Pong,
    Generated { text: String },
    Error { error: MarshaledError },
}

/// Frames pushed over a per-stream callback socket. `Completion` is always
/// the last frame; the socket is single use and closed right after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackFrame {
    Chunk { text: String },
    Completion { error: Option<MarshaledError> },
}
