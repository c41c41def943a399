//! # Wire Codec
//!
//! u32 big-endian length prefix followed by one bincode-serialized
//! message. A frame guard bounds what a peer can make us allocate.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::ManagerError;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; a full target list fits comfortably.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Transport and codec failures.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("tls: {0}")]
    Tls(String),
}

impl From<RpcError> for ManagerError {
    fn from(err: RpcError) -> Self {
        ManagerError::RpcConnectivity(err.to_string())
    }
}

/// Write one framed message.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let payload = bincode::serialize(message).map_err(|e| RpcError::Encode(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. `Ok(None)` means the peer closed cleanly
/// between frames.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, RpcError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let message = bincode::deserialize(&payload).map_err(|e| RpcError::Decode(e.to_string()))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Request;

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_message(&mut a, &Request::GetScopes).await.unwrap();
        let read: Option<Request> = read_message(&mut b).await.unwrap();
        assert_eq!(read.unwrap().method(), "GetScopes");
    }

    #[tokio::test]
    async fn test_clean_close_reads_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let read: Option<Request> = read_message(&mut b).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let bogus = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &bogus)
            .await
            .unwrap();
        let read: Result<Option<Request>, _> = read_message(&mut b).await;
        assert!(matches!(read, Err(RpcError::FrameTooLarge(_))));
    }
}
