//! Payload transfer on top of the frame codec.
//!
//! A payload is zero or more data frames of at most [`CHUNK_SIZE`] bytes
//! followed by a single end frame. The sender writes an abort frame
//! instead of the end frame if its source fails, so the receiver always
//! knows where the payload stops.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::CHUNK_SIZE;
use crate::error::{TransferError, WireError};
use crate::wire::{Frame, read_frame, write_abort, write_data, write_end};

/// Streams `source` to `writer` as a framed payload.
///
/// Returns the number of payload bytes sent.
pub async fn send_payload<R, W>(source: &mut R, writer: &mut W) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(sent = total, "payload source failed: {e}");
                write_abort(writer, &e.to_string()).await?;
                return Err(TransferError::Source(e));
            }
        };

        write_data(writer, &buf[..n]).await?;
        total += n as u64;
    }

    write_end(writer).await?;
    debug!(bytes = total, "payload sent");
    Ok(total)
}

/// Receives a framed payload from `reader` into `sink`.
///
/// If the sink fails, the remaining frames are still consumed up to the
/// end (or abort) frame before [`TransferError::Sink`] is returned.
/// Returns the number of payload bytes written.
pub async fn receive_payload<R, W>(reader: &mut R, sink: &mut W) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total: u64 = 0;
    let mut sink_error: Option<std::io::Error> = None;

    loop {
        match read_frame(reader).await? {
            None => return Err(TransferError::PrematureEof),
            Some(Frame::Data(chunk)) => {
                if sink_error.is_some() {
                    continue;
                }
                match sink.write_all(&chunk).await {
                    Ok(()) => total += chunk.len() as u64,
                    Err(e) => {
                        warn!(received = total, "payload sink failed, draining: {e}");
                        sink_error = Some(e);
                    }
                }
            }
            Some(Frame::End) => break,
            Some(Frame::Abort(reason)) => {
                debug!(received = total, %reason, "payload aborted by sender");
                return Err(TransferError::Aborted(reason));
            }
            Some(other @ Frame::Text(_)) => {
                return Err(WireError::Protocol(format!(
                    "unexpected {} frame inside payload",
                    other.name()
                ))
                .into());
            }
        }
    }

    if let Some(e) = sink_error {
        return Err(TransferError::Sink(e));
    }
    sink.flush().await.map_err(TransferError::Sink)?;

    debug!(bytes = total, "payload received");
    Ok(total)
}
