//! Length-prefixed msgpack framing for room connections.
//!
//! Frame layout: `u32` little-endian body length, then the `rmp-serde` body
//! (structs encoded as maps).

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::SyncError;

/// Protocol identifier for room connections
pub const ALPN: &[u8] = b"scenesync/room/1";

/// Application close code for a connection refused at the ceiling
pub const CLOSE_CAPACITY: u32 = 2;

/// Application close code for a peer whose stream lost framing
pub const CLOSE_PROTOCOL: u32 = 3;

/// Largest frame body accepted from a peer
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Send one message as a frame
pub async fn send_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), SyncError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let data = rmp_serde::to_vec_named(msg).map_err(|e| SyncError::Protocol(e.to_string()))?;
    if data.len() > MAX_FRAME_LEN {
        return Err(SyncError::FrameTooLarge { len: data.len() });
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive one frame.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
/// After [`SyncError::FrameTooLarge`] the reader is mid-frame and must not be
/// read from again; after [`SyncError::Protocol`] the next frame is intact.
pub async fn recv_frame<R, T>(reader: &mut R) -> Result<Option<T>, SyncError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SyncError::FrameTooLarge { len });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    rmp_serde::from_slice(&data)
        .map(Some)
        .map_err(|e| SyncError::Protocol(e.to_string()))
}
