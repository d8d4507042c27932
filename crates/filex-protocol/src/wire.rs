//! Frame codec over a byte stream.
//!
//! # Wire format
//!
//! ```text
//! FRAME:
//!   [1 byte: kind]
//!   [4 bytes BE: body_len]       (bounded per kind, see below)
//!   [body_len bytes: body]
//!
//! kind 0x01 TEXT   UTF-8 command or reply          (<= MAX_TEXT_LEN)
//! kind 0x02 DATA   payload chunk                   (<= MAX_DATA_LEN)
//! kind 0x03 END    end of payload                  (empty body)
//! kind 0x04 ABORT  sender gave up mid-payload      (<= MAX_TEXT_LEN)
//! ```
//!
//! Frames are reassembled with exact reads, so TCP segment boundaries
//! never matter. Text, end and abort frames are flushed as soon as they
//! are written; data frames are left in the writer's buffer and go out
//! with the end (or abort) frame that closes the payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{MAX_DATA_LEN, MAX_TEXT_LEN};
use crate::error::WireError;

/// Frame kind: command or reply text.
pub const KIND_TEXT: u8 = 0x01;

/// Frame kind: payload chunk.
pub const KIND_DATA: u8 = 0x02;

/// Frame kind: end of payload.
pub const KIND_END: u8 = 0x03;

/// Frame kind: payload aborted by the sender.
pub const KIND_ABORT: u8 = 0x04;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Data(Vec<u8>),
    End,
    Abort(String),
}

impl Frame {
    /// Wire kind byte of this frame.
    pub fn kind(&self) -> u8 {
        match self {
            Self::Text(_) => KIND_TEXT,
            Self::Data(_) => KIND_DATA,
            Self::End => KIND_END,
            Self::Abort(_) => KIND_ABORT,
        }
    }

    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Data(_) => "data",
            Self::End => "end",
            Self::Abort(_) => "abort",
        }
    }

    fn body(&self) -> &[u8] {
        match self {
            Self::Text(text) | Self::Abort(text) => text.as_bytes(),
            Self::Data(data) => data,
            Self::End => &[],
        }
    }
}

/// Largest body allowed for a frame kind, or `None` if the kind is unknown.
fn max_body_len(kind: u8) -> Option<usize> {
    match kind {
        KIND_TEXT | KIND_ABORT => Some(MAX_TEXT_LEN),
        KIND_DATA => Some(MAX_DATA_LEN),
        KIND_END => Some(0),
        _ => None,
    }
}

fn check_len(kind: u8, len: usize) -> Result<(), WireError> {
    let max = max_body_len(kind)
        .ok_or_else(|| WireError::Protocol(format!("unknown frame kind 0x{kind:02x}")))?;
    if len > max {
        return Err(WireError::Protocol(format!(
            "frame too long: {len} bytes (max {max} for kind 0x{kind:02x})"
        )));
    }
    Ok(())
}

async fn write_raw<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: u8,
    body: &[u8],
) -> Result<(), WireError> {
    let len = body.len();
    check_len(kind, len)?;

    writer.write_u8(kind).await?;
    writer.write_u32(len as u32).await?;
    writer.write_all(body).await?;
    Ok(())
}

/// Writes any frame, flushing unless it is a data frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), WireError> {
    write_raw(writer, frame.kind(), frame.body()).await?;
    if !matches!(frame, Frame::Data(_)) {
        writer.flush().await?;
    }
    Ok(())
}

/// Writes a text frame and flushes.
pub async fn write_text<W: AsyncWrite + Unpin>(
    writer: &mut W,
    text: &str,
) -> Result<(), WireError> {
    write_raw(writer, KIND_TEXT, text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes one payload chunk without flushing.
pub async fn write_data<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunk: &[u8],
) -> Result<(), WireError> {
    write_raw(writer, KIND_DATA, chunk).await
}

/// Writes the end-of-payload frame and flushes.
pub async fn write_end<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), WireError> {
    write_raw(writer, KIND_END, &[]).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes an abort frame carrying `reason` and flushes.
pub async fn write_abort<W: AsyncWrite + Unpin>(
    writer: &mut W,
    reason: &str,
) -> Result<(), WireError> {
    write_raw(writer, KIND_ABORT, reason.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame.
///
/// Returns `None` if the peer closed the stream cleanly between frames.
/// A close in the middle of a frame is an I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, WireError> {
    let kind = match reader.read_u8().await {
        Ok(kind) => kind,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = reader.read_u32().await? as usize;
    check_len(kind, len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let frame = match kind {
        KIND_TEXT => Frame::Text(
            String::from_utf8(body)
                .map_err(|e| WireError::Protocol(format!("invalid UTF-8 text: {e}")))?,
        ),
        KIND_DATA => Frame::Data(body),
        KIND_END => Frame::End,
        KIND_ABORT => Frame::Abort(String::from_utf8_lossy(&body).into_owned()),
        other => {
            return Err(WireError::Protocol(format!(
                "unknown frame kind 0x{other:02x}"
            )));
        }
    };

    Ok(Some(frame))
}

/// Reads the next frame and requires it to be text.
///
/// Returns `None` on a clean close.
pub async fn read_text<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, WireError> {
    match read_frame(reader).await? {
        None => Ok(None),
        Some(Frame::Text(text)) => Ok(Some(text)),
        Some(other) => Err(WireError::Protocol(format!(
            "expected text frame, got {}",
            other.name()
        ))),
    }
}
