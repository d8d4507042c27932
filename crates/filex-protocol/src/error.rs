//! Error types for framing and payload transfer.

/// Errors produced while reading or writing frames.
///
/// Both variants mean the byte stream can no longer be trusted, so
/// callers treat them as fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors produced while moving a file payload.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to read source: {0}")]
    Source(#[source] std::io::Error),

    #[error("failed to write destination: {0}")]
    Sink(#[source] std::io::Error),

    #[error("transfer aborted by peer: {0}")]
    Aborted(String),

    #[error("connection closed before end of transfer")]
    PrematureEof,

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl TransferError {
    /// Returns `true` when the failure left the stream out of sync.
    ///
    /// `Source`, `Sink` and `Aborted` happen at a frame boundary: the
    /// current command fails but the connection can carry on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PrematureEof | Self::Wire(_))
    }
}
