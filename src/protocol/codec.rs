//! SSH Agent protocol framing for tokio

use crate::error::{Error, Result};
use crate::protocol::message::AgentMessage;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body accepted from either side (256 KiB)
pub const MAX_FRAME_SIZE: u32 = 256 * 1024;

/// Codec for reading and writing length-prefixed SSH agent frames
pub struct AgentCodec;

impl AgentCodec {
    /// Read one frame body from an async reader.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly between
    /// frames. An EOF inside a frame is an `Error::Io`.
    pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf);
        if len == 0 {
            return Err(Error::Protocol("Zero-length message".to_string()));
        }
        if len > MAX_FRAME_SIZE {
            return Err(Error::Protocol(format!(
                "Message too large: {} bytes (limit {})",
                len, MAX_FRAME_SIZE
            )));
        }

        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }

    /// Read and decode one message
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<AgentMessage>> {
        match Self::read_frame(reader).await? {
            Some(body) => AgentMessage::decode(&body).map(Some),
            None => Ok(None),
        }
    }

    /// Write one frame: the length prefix, then the body.
    ///
    /// Callers sharing a writer must hold its lock across the whole call so
    /// frames from different writers never interleave.
    pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
        let len = u32::try_from(body.len())
            .map_err(|_| Error::Protocol(format!("Message too large: {} bytes", body.len())))?;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(body).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Encode and write a message
    pub async fn write<W: AsyncWrite + Unpin>(writer: &mut W, msg: &AgentMessage) -> Result<()> {
        Self::write_frame(writer, &msg.encode()).await
    }
}
