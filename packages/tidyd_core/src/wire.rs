//! Newline-delimited JSON framing used on both the primary and callback
//! channels.

use std::io::{Error, ErrorKind};

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Serialize `message` as one JSON line and flush it.
pub async fn write_line<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message)
        .map_err(|error| Error::new(ErrorKind::InvalidData, error))?;
    encoded.push(b'\n');

    writer.write_all(&encoded).await?;
    writer.flush().await
}
