// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed JSON framing.
//!
//! Each message is a 4-byte big-endian payload length followed by the JSON
//! payload. The length prefix never includes itself.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; protects both sides from a corrupt or
/// hostile length prefix.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {got} bytes exceeds maximum {max}")]
    FrameTooLarge { got: u32, max: u32 },

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// Serialize a message into a framed byte buffer.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(message)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { got: len, max: MAX_FRAME_BYTES });
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode one framed message from a byte buffer (prefix + payload).
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::Closed);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..4]);
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { got: len, max: MAX_FRAME_BYTES });
    }
    let end = 4usize + len as usize;
    if buf.len() < end {
        return Err(ProtocolError::Closed);
    }
    Ok(serde_json::from_slice(&buf[4..end])?)
}

/// Read one framed message from an async stream.
///
/// Returns [`ProtocolError::Closed`] on clean EOF at a frame boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed)
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }

    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { got: len, max: MAX_FRAME_BYTES });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Write one framed message to an async stream and flush it.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let buf = encode(message)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
