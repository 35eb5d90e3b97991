//! Transport layer between the playground and its interpreter agent.
//!
//! Provides the `Transport` trait and length-prefixed JSON framing functions.
//! `StdioPipeTransport` talks to an agent over its stdin/stdout pipes.

pub mod protocol;
pub mod stdio_pipe;

pub use protocol::{AgentRequest, AgentResponse};
pub use stdio_pipe::StdioPipeTransport;

use std::io::ErrorKind;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Maximum message size (64 MB). Safety valve against malformed messages.
const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Framing failures. After any of these the stream is out of sync and the
/// agent connection cannot be reused.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The agent closed its end before a frame started.
    #[error("Agent closed the connection")]
    Closed,

    #[error("Message exceeds max size: {0} > {max}", max = MAX_MESSAGE_SIZE)]
    Oversized(usize),

    /// The stream ended inside a frame body.
    #[error("Frame truncated: expected {0} bytes")]
    Truncated(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Abstraction over playground ↔ agent communication channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response.
    ///
    /// Access is mutex-guarded internally; concurrent callers serialize.
    async fn request(&self, req: &AgentRequest) -> Result<AgentResponse>;

    /// Gracefully shut down the transport and the underlying agent process.
    async fn shutdown(&self) -> Result<()>;

    /// Check whether the underlying agent process is still alive.
    fn is_alive(&self) -> bool;
}

/// Write a length-prefixed message to a writer.
///
/// Format: [4-byte big-endian length][payload bytes]
pub async fn send_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or(FrameError::Oversized(payload.len()))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed message from a reader.
///
/// Returns the raw payload bytes. Enforces `MAX_MESSAGE_SIZE`. End of stream
/// before the header is reported as [`FrameError::Closed`], inside the body
/// as [`FrameError::Truncated`].
pub async fn recv_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => FrameError::Closed,
            _ => FrameError::Io(e),
        })?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::Oversized(len as usize));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => FrameError::Truncated(len),
            _ => FrameError::Io(e),
        })?;
    Ok(buf)
}
