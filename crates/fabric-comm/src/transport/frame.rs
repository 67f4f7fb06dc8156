//! Envelope framing.
//!
//! ```text
//! [length: 4 bytes, u32 big-endian][body: `length` bytes of JSON]
//! ```
//!
//! Every envelope frame is answered by one [`Ack`] frame on the same
//! connection.

use crate::domain::error::{CommError, TaskError};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this size are refused by both sides.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Delivery acknowledgement written by a listener for every frame it reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl Ack {
    pub fn accepted() -> Self {
        Self { ok: true, error: None }
    }

    pub fn rejected(error: TaskError) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

/// Serialize an envelope into a frame body, enforcing the size limit.
pub fn encode<T: Serialize>(envelope: &T) -> Result<Vec<u8>, CommError> {
    let body = serde_json::to_vec(envelope)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(CommError::Serialization(format!(
            "envelope of {} bytes exceeds frame limit of {MAX_FRAME_SIZE}",
            body.len()
        )));
    }
    Ok(body)
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_SIZE)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Read one frame body. Returns `Ok(None)` on a clean EOF before a new frame.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_SIZE}"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
