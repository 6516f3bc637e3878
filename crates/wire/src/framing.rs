//! Length-prefixed frame codec.
//!
//! Every message on the channel is one frame: a u32 big-endian length
//! followed by the prost-encoded envelope. Frames above `MAX_FRAME_LEN`
//! are rejected before allocation.

use std::io;

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Generous for a full session snapshot;
/// anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Write one message as a frame.
pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let bytes = message.encode_to_vec();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds MAX_FRAME_LEN", bytes.len()),
        ));
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read one frame. Returns `None` on clean EOF at a frame boundary.
pub async fn read_frame<R, M>(reader: &mut R) -> io::Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("incoming frame of {len} bytes exceeds MAX_FRAME_LEN"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    M::decode(buf.as_slice()).map(Some).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("frame decode failed: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientEnvelope, ClientRequest, PeekRequest};

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = ClientEnvelope {
            correlation: 3,
            request: Some(ClientRequest::Peek(PeekRequest { code: "AB12".into() })),
        };
        write_frame(&mut a, &msg).await.unwrap();
        let decoded: ClientEnvelope = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn test_sequential_frames_stay_ordered() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        for i in 1..=3u64 {
            let msg = ClientEnvelope {
                correlation: i,
                request: Some(ClientRequest::Ping(crate::PingRequest {})),
            };
            write_frame(&mut a, &msg).await.unwrap();
        }
        for i in 1..=3u64 {
            let decoded: ClientEnvelope = read_frame(&mut b).await.unwrap().unwrap();
            assert_eq!(decoded.correlation, i);
        }
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let decoded: Option<ClientEnvelope> = read_frame(&mut b).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_u32(&mut a, (MAX_FRAME_LEN as u32) + 1)
            .await
            .unwrap();
        let err = read_frame::<_, ClientEnvelope>(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
