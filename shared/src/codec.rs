//! Length-prefixed framing over any ordered byte stream
//!
//! Layout of a frame:
//! - 4 bytes: payload length (u32, big-endian)
//! - N bytes: payload (one encoded [`Message`])

use crate::error::{NetError, ProtocolError};
use crate::protocol::{self, Message};
use crate::MAX_FRAME_SIZE;
use std::io::{self, ErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Writes one frame and flushes the writer
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame
///
/// Returns `Ok(None)` when the peer closed the stream before a new frame
/// started. A stream ending anywhere inside a frame, length prefix
/// included, is a transport error. An oversize length prefix is an error
/// too: the stream position can no longer be trusted after it.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Vec<u8>>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("stream ended after {} of 4 length bytes", filled),
            )
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: max_frame_size,
        }
        .into());
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Encodes and writes one message
pub async fn send_message<W>(writer: &mut W, message: &Message) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let payload = protocol::encode(message)?;
    write_frame(writer, &payload).await
}

/// Reads and decodes one message
///
/// A payload that fails to decode surfaces as `NetError::Protocol`, which is
/// not fatal: the next frame can still be read.
pub async fn recv_message<R>(reader: &mut R) -> Result<Option<Message>, NetError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, MAX_FRAME_SIZE).await? {
        Some(payload) => Ok(Some(protocol::decode(&payload)?)),
        None => Ok(None),
    }
}
