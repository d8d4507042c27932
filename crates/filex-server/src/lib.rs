//! File exchange server.
//!
//! Accepts any number of concurrent TCP clients. Each connection gets
//! its own task that reads one command at a time, dispatches it against
//! the shared [`Registry`] and [`Storage`], and writes the reply before
//! reading the next command.

pub mod config;
mod connection;
pub mod dispatcher;
pub mod registry;
mod server;
pub mod storage;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, Outcome};
pub use registry::{Registry, RegistryError, Session, SessionId, SessionState};
pub use server::FileServer;
pub use storage::{Storage, StorageError, Upload};

use filex_protocol::{TransferError, WireError};

/// Errors produced by the file exchange server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unexpected {0} frame outside a transfer")]
    UnexpectedFrame(&'static str),
}
