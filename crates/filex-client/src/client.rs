//! File exchange client (one connection).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use filex_protocol::wire::{read_frame, write_text};
use filex_protocol::{
    CHUNK_SIZE, Command, Frame, REPLY_TIMEOUT, WireError, receive_payload, reply, send_payload,
};

use crate::CONNECT_TIMEOUT;
use crate::error::ClientError;

/// A connection to a file exchange server.
pub struct FileClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    reply_timeout: Duration,
}

impl FileClient {
    /// Opens a TCP connection without sending anything.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::ConnectFailed(e)),
            Err(_) => {
                return Err(ClientError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                )));
            }
        };
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        info!(%peer_addr, "connected to file server");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::with_capacity(8 * CHUNK_SIZE, reader),
            writer: BufWriter::new(writer),
            peer_addr,
            reply_timeout: REPLY_TIMEOUT,
        })
    }

    /// Connects and performs the `/join` handshake.
    ///
    /// Returns the client together with the server's confirmation.
    pub async fn join(host: &str, port: u16) -> Result<(Self, String), ClientError> {
        let mut client = Self::connect(host, port).await?;
        let confirmation = client.command(&format!("/join {host} {port}")).await?;
        Ok((client, confirmation))
    }

    /// Changes how long to wait for short command replies.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Sends an arbitrary command line and returns the server's reply text.
    ///
    /// Failure replies are returned as `Ok` too; use the typed methods to
    /// have them turned into [`ClientError::Rejected`].
    pub async fn command(&mut self, line: &str) -> Result<String, ClientError> {
        debug!(%line, "sending command");
        write_text(&mut self.writer, line).await?;
        self.read_reply().await
    }

    /// `/register <handle>`
    pub async fn register(&mut self, handle: &str) -> Result<String, ClientError> {
        let command = Command::Register {
            handle: single_word(handle)?.to_string(),
        };
        let text = self.command(&command.to_string()).await?;
        reject_errors(text)
    }

    /// `/dir`; returns the listing text.
    pub async fn dir(&mut self) -> Result<String, ClientError> {
        let text = self.command(&Command::Dir.to_string()).await?;
        reject_errors(text)
    }

    /// `/?`
    pub async fn help(&mut self) -> Result<String, ClientError> {
        self.command(&Command::Help.to_string()).await
    }

    /// `/leave`; closes the connection and returns the farewell.
    pub async fn leave(mut self) -> Result<String, ClientError> {
        let farewell = self.command(&Command::Leave.to_string()).await?;
        let _ = self.writer.shutdown().await;
        info!(peer_addr = %self.peer_addr, "disconnected");
        Ok(farewell)
    }

    /// `/store <name>`: uploads `local_path` under its file name.
    ///
    /// The local file is opened before the server is contacted, so a
    /// missing file costs no round trip. Returns the server's upload note.
    pub async fn store(&mut self, local_path: &Path) -> Result<String, ClientError> {
        let filename = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(ClientError::ParameterMismatch)?;
        let filename = single_word(filename)?;

        let mut file = match tokio::fs::File::open(local_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::LocalFileNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let command = Command::Store {
            filename: filename.to_string(),
        };
        let ready = self.command(&command.to_string()).await?;
        if !ready.starts_with(reply::READY_TO_RECEIVE) {
            return Err(ClientError::Rejected(ready));
        }

        match send_payload(&mut file, &mut self.writer).await {
            Ok(bytes) => debug!(filename, bytes, "upload sent"),
            Err(e) if !e.is_fatal() => {
                // The server answers the abort frame with a failure line.
                let answer = self.read_reply().await?;
                warn!(filename, %answer, "upload aborted: {e}");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        let note = reject_errors(self.read_reply().await?)?;
        info!(filename, "upload confirmed");
        Ok(note)
    }

    /// `/get <filename>`: downloads into `dest_dir/filename`.
    ///
    /// A partially written file is removed if the transfer fails.
    pub async fn get(&mut self, filename: &str, dest_dir: &Path) -> Result<PathBuf, ClientError> {
        let filename = single_word(filename)?;
        let command = Command::Get {
            filename: filename.to_string(),
        };
        let ready = self.command(&command.to_string()).await?;
        if !ready.starts_with(reply::READY_TO_SEND) {
            return Err(ClientError::Rejected(ready));
        }

        let dest = dest_dir.join(filename);
        let mut file = match tokio::fs::File::create(&dest).await {
            Ok(file) => file,
            Err(e) => {
                // Consume the payload anyway so the next command lines up.
                receive_payload(&mut self.reader, &mut tokio::io::sink()).await?;
                return Err(e.into());
            }
        };

        match receive_payload(&mut self.reader, &mut file).await {
            Ok(bytes) => {
                info!(filename, bytes, "file received");
                Ok(dest)
            }
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&dest).await {
                    warn!(path = %dest.display(), "failed to remove partial download: {rm}");
                }
                Err(e.into())
            }
        }
    }

    async fn read_reply(&mut self) -> Result<String, ClientError> {
        let frame = tokio::time::timeout(self.reply_timeout, read_frame(&mut self.reader))
            .await
            .map_err(|_| ClientError::NoResponse)??;

        match frame {
            Some(Frame::Text(text)) => Ok(text),
            Some(other) => Err(WireError::Protocol(format!(
                "expected reply text, got {} frame",
                other.name()
            ))
            .into()),
            None => Err(ClientError::Closed),
        }
    }
}

/// Arguments travel space-separated, so each must be one non-empty word.
fn single_word(arg: &str) -> Result<&str, ClientError> {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        return Err(ClientError::ParameterMismatch);
    }
    Ok(arg)
}

fn reject_errors(text: String) -> Result<String, ClientError> {
    if reply::is_error(&text) {
        Err(ClientError::Rejected(text))
    } else {
        Ok(text)
    }
}
