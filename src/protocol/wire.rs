//! Async wire framing
//!
//! Reads and writes handshakes and length-prefixed messages over any async
//! byte stream. Frames are capped so a hostile length prefix cannot allocate
//! unbounded memory.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Handshake, Message, HANDSHAKE_LEN};
use crate::error::TorrentError;

/// Largest frame we will accept: one block plus the piece message header,
/// with headroom for oversized bitfields.
const MAX_FRAME_LEN: usize = 256 * 1024;

/// Read one length-prefixed message from the stream
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length == 0 {
        return Ok(Message::KeepAlive);
    }
    if length > MAX_FRAME_LEN {
        return Err(TorrentError::protocol(format!("frame length {} exceeds limit", length)).into());
    }

    let mut frame = vec![0u8; length];
    reader.read_exact(&mut frame).await?;
    Message::parse_frame(&frame)
}

/// Write one message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the 68-byte handshake from the stream
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut frame = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut frame).await?;
    Handshake::deserialize(&frame)
}

/// Write the 68-byte handshake to the stream
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    handshake: &Handshake,
) -> Result<()> {
    writer.write_all(&handshake.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_round_trip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let sent = Message::Request { index: 2, begin: 16384, length: 16384 };
        write_message(&mut client, &sent).await.unwrap();
        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_keepalive_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_message(&mut client, &Message::KeepAlive).await.unwrap();
        assert_eq!(read_message(&mut server).await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_handshake_round_trip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(256);

        let sent = Handshake::new([0xaa; 20], [0xbb; 20]);
        write_handshake(&mut client, &sent).await.unwrap();
        let received = read_handshake(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes()).await.unwrap();
        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_stream_errors() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 5, 4]).await.unwrap();
        drop(client);
        assert!(read_message(&mut server).await.is_err());
    }
}
