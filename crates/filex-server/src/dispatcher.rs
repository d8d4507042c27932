//! Command dispatch for one connection.
//!
//! [`Dispatcher::dispatch`] resolves a single command line completely,
//! including any payload that travels with it, and writes every reply
//! itself. Command-level failures (unknown verb, wrong argument count,
//! missing registration, failed transfer) become reply text and the
//! connection carries on. Only errors that leave the byte stream in an
//! unknown state are returned.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use filex_protocol::reply;
use filex_protocol::wire::write_text;
use filex_protocol::{Command, CommandError, MAX_TEXT_LEN, receive_payload, send_payload};

use crate::ServerError;
use crate::registry::{Registry, RegistryError, Session};
use crate::storage::{Storage, StorageError};

/// What the connection should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Close,
}

/// Shared command handlers, one instance per server.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    storage: Storage,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, storage: Storage) -> Self {
        Self { registry, storage }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Runs one command line for `session`.
    ///
    /// `reader` and `writer` are the connection halves; they are only
    /// read from for `/store` payloads.
    pub async fn dispatch<R, W>(
        &self,
        session: &mut Session,
        line: &str,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<Outcome, ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(CommandError::NotFound) => {
                debug!(session = session.id(), %line, "unknown command");
                write_text(writer, reply::COMMAND_NOT_FOUND).await?;
                return Ok(Outcome::Continue);
            }
            Err(CommandError::ParameterMismatch) => {
                debug!(session = session.id(), %line, "parameter mismatch");
                write_text(writer, reply::PARAMETER_MISMATCH).await?;
                return Ok(Outcome::Continue);
            }
        };

        debug!(session = session.id(), command = command.verb(), "dispatching");

        if command.requires_registration() && !session.is_registered() {
            write_text(writer, reply::REGISTER_FIRST).await?;
            return Ok(Outcome::Continue);
        }

        match command {
            Command::Join => {
                session.mark_joined();
                write_text(writer, reply::JOIN_OK).await?;
            }
            Command::Register { handle } => self.register(session, &handle, writer).await?,
            Command::Store { filename } => self.store(session, &filename, reader, writer).await?,
            Command::Get { filename } => self.get(&filename, writer).await?,
            Command::Dir => self.dir(writer).await?,
            Command::Help => write_text(writer, reply::HELP).await?,
            Command::Leave => {
                self.registry.unregister(session).await;
                session.mark_closed();
                write_text(writer, reply::LEAVE_OK).await?;
                return Ok(Outcome::Close);
            }
        }

        Ok(Outcome::Continue)
    }

    async fn register<W: AsyncWrite + Unpin>(
        &self,
        session: &mut Session,
        handle: &str,
        writer: &mut W,
    ) -> Result<(), ServerError> {
        let text = match self.registry.register(handle, session).await {
            Ok(()) => {
                info!(session = session.id(), peer = %session.address(), handle, "registered");
                reply::welcome(handle)
            }
            Err(RegistryError::AlreadyExists(_)) => {
                debug!(session = session.id(), handle, "handle taken");
                reply::HANDLE_TAKEN.to_string()
            }
            Err(RegistryError::AlreadyRegistered(current)) => reply::already_registered(&current),
        };
        write_text(writer, &text).await?;
        Ok(())
    }

    async fn store<R, W>(
        &self,
        session: &Session,
        filename: &str,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut upload = match self.storage.begin_upload(filename).await {
            Ok(upload) => upload,
            Err(StorageError::InvalidName(reason)) => {
                warn!(session = session.id(), %reason, "rejected upload name");
                write_text(writer, &reply::invalid_filename(filename)).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(session = session.id(), filename, "cannot stage upload: {e}");
                write_text(writer, &reply::upload_failed(e)).await?;
                return Ok(());
            }
        };

        write_text(writer, &reply::ready_to_receive(filename)).await?;

        let bytes = match receive_payload(reader, upload.file_mut()).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_fatal() => {
                self.storage.abandon(upload).await;
                return Err(e.into());
            }
            Err(e) => {
                warn!(session = session.id(), filename, "upload failed: {e}");
                self.storage.abandon(upload).await;
                write_text(writer, &reply::upload_failed(e)).await?;
                return Ok(());
            }
        };

        if let Err(e) = self.storage.commit(upload).await {
            warn!(session = session.id(), filename, "cannot commit upload: {e}");
            write_text(writer, &reply::upload_failed(e)).await?;
            return Ok(());
        }

        let handle = session.handle().unwrap_or_default();
        info!(session = session.id(), handle, filename, bytes, "upload complete");
        let note = reply::upload_note(handle, &chrono::Local::now(), filename);
        write_text(writer, &note).await?;
        Ok(())
    }

    async fn get<W: AsyncWrite + Unpin>(
        &self,
        filename: &str,
        writer: &mut W,
    ) -> Result<(), ServerError> {
        let mut file = match self.storage.open_object(filename).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                write_text(writer, reply::FILE_NOT_FOUND).await?;
                return Ok(());
            }
            Err(StorageError::InvalidName(_)) => {
                write_text(writer, &reply::invalid_filename(filename)).await?;
                return Ok(());
            }
            Err(e) => {
                warn!(filename, "cannot open object: {e}");
                write_text(writer, &reply::download_failed(e)).await?;
                return Ok(());
            }
        };

        write_text(writer, &reply::ready_to_send(filename)).await?;

        match send_payload(&mut file, writer).await {
            Ok(bytes) => debug!(filename, bytes, "download complete"),
            // The peer has already been told through the abort frame.
            Err(e) if !e.is_fatal() => warn!(filename, "download aborted: {e}"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn dir<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), ServerError> {
        let text = match self.storage.list().await {
            Ok(names) => {
                let listing = reply::directory(&names);
                if listing.len() > MAX_TEXT_LEN {
                    warn!(objects = names.len(), bytes = listing.len(), "listing too large to send");
                    reply::DIR_FAILED.to_string()
                } else {
                    listing
                }
            }
            Err(e) => {
                warn!("cannot list storage: {e}");
                reply::DIR_FAILED.to_string()
            }
        };
        write_text(writer, &text).await?;
        Ok(())
    }
}
