//! Per-connection command loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use filex_protocol::CHUNK_SIZE;
use filex_protocol::wire::{Frame, read_frame};

use crate::ServerError;
use crate::dispatcher::{Dispatcher, Outcome};
use crate::registry::Session;

/// Read buffer size: room for a few full data frames.
const READ_BUFFER_SIZE: usize = 8 * CHUNK_SIZE;

/// Owns one client connection from accept to close.
///
/// Whatever ends the loop (`/leave`, peer close, protocol error,
/// shutdown), the session's handle is released before returning.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    let mut session = Session::new(peer_addr);
    info!(%peer_addr, session = session.id(), "connection established");

    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, reader);
    let mut writer = BufWriter::new(writer);

    match serve(&dispatcher, &mut session, &mut reader, &mut writer, &cancel).await {
        Ok(()) => info!(%peer_addr, session = session.id(), "connection closed"),
        Err(e) => error!(%peer_addr, session = session.id(), "connection error: {e}"),
    }

    if dispatcher.registry().unregister(&session).await {
        debug!(handle = session.handle(), "handle released");
    }
    session.mark_closed();
    let _ = writer.shutdown().await;
}

/// Reads and dispatches commands until the session ends.
async fn serve<R, W>(
    dispatcher: &Dispatcher,
    session: &mut Session,
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = session.id(), "shutdown requested");
                return Ok(());
            }
            frame = read_frame(reader) => frame?,
        };

        let line = match frame {
            None => {
                debug!(session = session.id(), "peer closed connection");
                return Ok(());
            }
            Some(Frame::Text(line)) => line,
            Some(other) => return Err(ServerError::UnexpectedFrame(other.name())),
        };

        debug!(session = session.id(), %line, "received command");

        if dispatcher.dispatch(session, &line, reader, writer).await? == Outcome::Close {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use filex_protocol::reply;
    use filex_protocol::wire::{read_text, write_data, write_text};

    use super::*;
    use crate::registry::Registry;
    use crate::storage::Storage;

    async fn dispatcher(root: &std::path::Path) -> Arc<Dispatcher> {
        let storage = Storage::open(root, false).await.unwrap();
        Arc::new(Dispatcher::new(Arc::new(Registry::new()), storage))
    }

    fn session() -> Session {
        Session::new(SocketAddr::from(([127, 0, 0, 1], 40001)))
    }

    #[tokio::test]
    async fn serves_until_leave() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path()).await;

        let mut input = Vec::new();
        write_text(&mut input, "/join").await.unwrap();
        write_text(&mut input, "/register alice").await.unwrap();
        write_text(&mut input, "/leave").await.unwrap();
        write_text(&mut input, "/dir").await.unwrap();

        let mut reader = &input[..];
        let mut out = Vec::new();
        let mut s = session();
        serve(&d, &mut s, &mut reader, &mut out, &CancellationToken::new())
            .await
            .unwrap();

        let mut cursor = &out[..];
        let mut replies = Vec::new();
        while let Some(text) = read_text(&mut cursor).await.unwrap() {
            replies.push(text);
        }
        assert_eq!(
            replies,
            vec![reply::JOIN_OK, "Welcome alice!", reply::LEAVE_OK]
        );
        // The trailing /dir was never read.
        assert!(!reader.is_empty());
    }

    #[tokio::test]
    async fn stray_data_frame_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path()).await;

        let mut input = Vec::new();
        write_data(&mut input, b"DONE").await.unwrap();

        let mut reader = &input[..];
        let mut out = Vec::new();
        let mut s = session();
        let result = serve(&d, &mut s, &mut reader, &mut out, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::UnexpectedFrame("data"))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        // A duplex that never yields data: only cancellation can end the loop.
        let (_client, server) = tokio::io::duplex(64);
        let (mut reader, mut writer) = tokio::io::split(server);
        let mut s = session();
        serve(&d, &mut s, &mut reader, &mut writer, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connection_drop_releases_handle() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path()).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_d = Arc::clone(&d);
        let task = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer, server_d, CancellationToken::new()).await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut rd, mut wr) = stream.into_split();
        write_text(&mut wr, "/register alice").await.unwrap();
        assert_eq!(
            read_text(&mut rd).await.unwrap().as_deref(),
            Some("Welcome alice!")
        );
        assert!(d.registry().lookup("alice").await.is_some());

        drop(wr);
        drop(rd);
        task.await.unwrap();
        assert!(d.registry().lookup("alice").await.is_none());
    }
}
