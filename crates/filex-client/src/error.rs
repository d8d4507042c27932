//! Client error types.
//!
//! Variants that correspond to a message a user would see carry that
//! message as their display text.

use filex_protocol::{TransferError, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Error: Connection to the Server has failed! Please check IP Address and Port Number.")]
    ConnectFailed(#[source] std::io::Error),

    #[error("Error: No response from server")]
    NoResponse,

    #[error("Error: File not found.")]
    LocalFileNotFound,

    #[error("Error: Command parameters do not match or is not allowed.")]
    ParameterMismatch,

    /// The server answered with a failure reply.
    #[error("{0}")]
    Rejected(String),

    #[error("connection closed by server")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}
