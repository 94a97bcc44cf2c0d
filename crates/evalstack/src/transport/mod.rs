//! The channel evaluations travel over.

use async_trait::async_trait;
use evalstack_types::{EvaluateRequest, EvaluateResponse, MAX_FRAME_LEN, RemoteObjectId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

mod framed;

pub use framed::FramedTransport;

/// Sends one evaluation and waits for its response.
///
/// Implementations must keep responses of one logical call chain in order;
/// nothing is assumed across unrelated chains.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn evaluate(&self, request: EvaluateRequest) -> Result<EvaluateResponse, TransportError>;

    /// Lets the remote context collect an object a handle pointed at.
    async fn release(&self, object_id: RemoteObjectId) -> Result<(), TransportError> {
        let _ = object_id;
        Ok(())
    }
}

/// Reads one length-prefixed (u32, big endian) frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Writes one length-prefixed frame and flushes.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<usize, TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if bytes.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let frame_len = u32::try_from(bytes.len()).map_err(|_| TransportError::FrameTooLarge {
        len: bytes.len(),
        max: MAX_FRAME_LEN,
    })?;

    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(bytes.len())
}
