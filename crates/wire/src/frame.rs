//! Message framing.
//!
//! Every protocol in the system shares the same 5-byte frame header: one
//! tag byte followed by the body length as a 32-bit little-endian integer.
//! The body is the protobuf encoding of the protocol's envelope message.

use crate::{WireError, WireResult};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tag byte opening every frame.
pub const FRAME_TAG: u8 = 0x0d;

/// Frame header length: tag byte + 4-byte little-endian body length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Maximum accepted body length (16 MiB, bounded by image payloads).
pub const MAX_FRAME_BODY: u32 = 16 * 1024 * 1024;

/// Write one framed message body.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = body.len() as u32;
    if len > MAX_FRAME_BODY {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0] = FRAME_TAG;
    header[1..].copy_from_slice(&len.to_le_bytes());
    writer.write_all(&header).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message body.
///
/// A clean EOF before the header maps to [`WireError::ConnectionClosed`];
/// a short read inside a frame does the same, since the counterpart is
/// gone either way.
pub async fn read_frame<R>(reader: &mut R) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_fully(reader, &mut header).await?;

    if header[0] != FRAME_TAG {
        return Err(WireError::InvalidTag(header[0]));
    }
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_FRAME_BODY {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    read_fully(reader, &mut body).await?;
    Ok(body)
}

/// Encode and write one protobuf message.
pub async fn write_message<M, W>(writer: &mut W, message: &M) -> WireResult<()>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &message.encode_to_vec()).await
}

/// Read and decode one protobuf message.
pub async fn read_message<M, R>(reader: &mut R) -> WireResult<M>
where
    M: Message + Default,
    R: AsyncRead + Unpin,
{
    let body = read_frame(reader).await?;
    Ok(M::decode(body.as_slice())?)
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> WireResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(WireError::ConnectionClosed)
        }
        Err(e) => Err(WireError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::{loc_message, LocMessage};

    #[tokio::test]
    async fn frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"payload").await.unwrap();
        assert_eq!(buf[0], FRAME_TAG);
        assert_eq!(buf.len(), FRAME_HEADER_LEN + 7);

        let mut cursor = std::io::Cursor::new(buf);
        let body = read_frame(&mut cursor).await.unwrap();
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn message_round_trip() {
        let msg = LocMessage {
            id: 42,
            kind: Some(loc_message::Kind::Request(Default::default())),
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let back: LocMessage = read_message(&mut cursor).await.unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn bad_tag_is_rejected() {
        let mut frame = vec![0xff, 1, 0, 0, 0, 0];
        let mut cursor = std::io::Cursor::new(&mut frame);
        match read_frame(&mut cursor).await {
            Err(WireError::InvalidTag(0xff)) => {}
            other => panic!("expected InvalidTag, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut frame = vec![FRAME_TAG];
        frame.extend_from_slice(&(MAX_FRAME_BODY + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn truncated_stream_reports_closed() {
        let mut frame = Vec::new();
        write_frame(&mut frame, b"full body").await.unwrap();
        frame.truncate(frame.len() - 3);

        let mut cursor = std::io::Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(WireError::ConnectionClosed)
        ));
    }
}
