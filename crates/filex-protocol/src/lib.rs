//! Wire protocol for the filex file exchange.
//!
//! Both ends of a connection exchange typed frames over a plain TCP
//! stream. Commands and replies travel as text frames; file payloads
//! travel as a run of data frames closed by an end frame, so payload
//! bytes can never be mistaken for a command or for the end of a file.
//!
//! # Wire format
//!
//! See [`wire`] for the frame layout and [`transfer`] for payload framing.

pub mod command;
pub mod error;
pub mod reply;
pub mod transfer;
pub mod wire;

pub use command::{Command, CommandError};
pub use error::{TransferError, WireError};
pub use transfer::{receive_payload, send_payload};
pub use wire::{Frame, read_frame, read_text, write_frame, write_text};

use std::time::Duration;

/// Maximum payload bytes carried by one data frame (shared by both ends).
pub const CHUNK_SIZE: usize = 1024;

/// Largest data frame body either end will write or accept (64 KiB).
pub const MAX_DATA_LEN: usize = 64 * 1024;

/// Largest text or abort frame body either end will write or accept
/// (16 MiB). A whole `/dir` listing travels in one text frame.
pub const MAX_TEXT_LEN: usize = 16 * 1024 * 1024;

/// Default listening host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 12345;

/// How long a client waits for the reply to a short command.
///
/// Bulk transfers are never subject to this timeout.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
