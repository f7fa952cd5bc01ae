//! Frame encoding and decoding for the control channel.
//!
//! The codec keeps no state between calls. Writers are expected to be
//! buffered; every write ends with a flush so the frame reaches the
//! transport before the call returns.

use super::{MessageType, MAX_BODY_LENGTH};
use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Type byte plus 16-bit length.
const HEADER_LEN: usize = 3;

/// One typed, length-prefixed unit of the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub body: Bytes,
}

/// Body of most control frames.
#[derive(Debug, Serialize, Deserialize)]
struct StandardMessage {
    msg: String,
}

/// Read one frame. A stream that ends early yields `IncompleteFrame`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let msg_type = header[0];
    let length = u16::from_be_bytes([header[1], header[2]]) as usize;

    let mut body = BytesMut::zeroed(length);
    reader.read_exact(&mut body).await?;

    trace!(
        msg_type,
        length,
        body = %String::from_utf8_lossy(&body),
        "Read frame"
    );

    Ok(Frame {
        msg_type,
        body: body.freeze(),
    })
}

/// Write one frame and flush.
///
/// The type is a raw byte because framing is independent of the message
/// vocabulary: any of the 256 type codes round-trips through
/// [`read_frame`], which also hands back a raw byte. Callers sending a
/// known message pass `MessageType::X.into()`.
pub async fn write_frame<W>(writer: &mut W, msg_type: u8, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_BODY_LENGTH {
        return Err(ProtocolError::BodyTooLarge(body.len()));
    }

    trace!(
        msg_type,
        length = body.len(),
        body = %String::from_utf8_lossy(body),
        "Write frame"
    );

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u8(msg_type);
    frame.put_u16(body.len() as u16);
    frame.put_slice(body);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame and decode its body as `{"msg": ...}`.
pub async fn read_standard_message<R>(reader: &mut R) -> Result<(u8, String)>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    let message: StandardMessage = serde_json::from_slice(&frame.body)?;
    Ok((frame.msg_type, message.msg))
}

/// Encode `{"msg": msg}` and write it as a frame of the given type.
pub async fn write_standard_message<W>(
    writer: &mut W,
    msg_type: MessageType,
    msg: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(&StandardMessage {
        msg: msg.to_string(),
    })?;
    write_frame(writer, msg_type.into(), &body).await
}

/// Write unframed text directly to the transport and flush.
pub async fn write_raw_string<W>(writer: &mut W, s: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    trace!(text = s, "Write raw string");
    writer.write_all(s.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
