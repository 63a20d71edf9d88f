//! Length-prefixed JSON frames
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. Frames above [`MAX_FRAME_LEN`] are refused in both directions.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_LEN)]
    TooLarge(usize),

    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
///
/// Returns the decoded value and the number of bytes consumed.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<(T, usize)>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let value = serde_json::from_slice(&buf)?;
    Ok(Some((value, len + 4)))
}

/// Write one frame and flush. Returns the number of bytes written.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<usize, FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(payload.len() + 4)
}
