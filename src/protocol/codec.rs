//! Wire framing
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! +-----------+-------------+---------------------------+
//! | code: i32 | length: u32 | bincode(Payload) [length] |
//! +-----------+-------------+---------------------------+
//! ```
//!
//! A frame whose code is [`SHUTDOWN_CODE`] is the terminal signal and carries
//! neither length nor payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::action::SHUTDOWN_CODE;
use super::payload::Payload;
use crate::error::QarsError;

/// Default upper bound for a single encoded payload
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One decoded frame. The code is kept raw so unknown codes can be answered.
#[derive(Debug, Clone)]
pub struct Frame {
    pub code: i32,
    pub payload: Payload,
}

impl Frame {
    pub fn new(code: i32, payload: Payload) -> Self {
        Self { code, payload }
    }

    pub fn is_shutdown(&self) -> bool {
        self.code == SHUTDOWN_CODE
    }
}

/// Encode a payload, enforcing the frame limit
pub fn encode_payload(payload: &Payload, max_frame_bytes: usize) -> Result<Vec<u8>, QarsError> {
    let bytes = bincode::serialize(payload)?;
    if bytes.len() > max_frame_bytes {
        return Err(QarsError::FrameTooLarge {
            size: bytes.len(),
            limit: max_frame_bytes,
        });
    }
    Ok(bytes)
}

/// Read one frame. A closed stream surfaces as a transport error.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Frame, QarsError>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_i32().await?;
    if code == SHUTDOWN_CODE {
        return Ok(Frame::new(code, Payload::Null));
    }

    let len = reader.read_u32().await? as usize;
    if len > max_frame_bytes {
        return Err(QarsError::FrameTooLarge {
            size: len,
            limit: max_frame_bytes,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let payload = bincode::deserialize(&buf)?;
    Ok(Frame::new(code, payload))
}

/// Write one frame and flush it. Shutdown frames are written without payload.
pub async fn write_frame<W>(
    writer: &mut W,
    code: i32,
    payload: &Payload,
    max_frame_bytes: usize,
) -> Result<(), QarsError>
where
    W: AsyncWrite + Unpin,
{
    if code == SHUTDOWN_CODE {
        return write_shutdown(writer).await;
    }
    let bytes = encode_payload(payload, max_frame_bytes)?;
    let mut buf = Vec::with_capacity(8 + bytes.len());
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(&bytes);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the terminal shutdown signal
pub async fn write_shutdown<W>(writer: &mut W) -> Result<(), QarsError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(SHUTDOWN_CODE).await?;
    writer.flush().await?;
    Ok(())
}
