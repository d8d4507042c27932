//! Reply texts sent by the server.
//!
//! Clients match on the `READY_*` prefixes to decide whether a payload
//! follows, so those strings are part of the protocol.

use chrono::{DateTime, TimeZone};

/// Prefix shared by every failure reply.
pub const ERROR_PREFIX: &str = "Error:";

/// Reply to `/join`.
pub const JOIN_OK: &str = "Connection to the File Exchange Server is successful!";

/// Reply to `/leave`.
pub const LEAVE_OK: &str = "Connection closed. Thank you!";

/// Reply to an unknown verb.
pub const COMMAND_NOT_FOUND: &str = "Error: Command not found.";

/// Reply to a command with the wrong number of arguments.
pub const PARAMETER_MISMATCH: &str = "Error: Command parameters do not match or is not allowed.";

/// Reply to `/register` with a handle owned by another live session.
pub const HANDLE_TAKEN: &str = "Error: Registration failed. Handle or alias already exists.";

/// Reply to a command that needs a registered session.
pub const REGISTER_FIRST: &str = "Error: Please register first using /register <handle>";

/// Reply to `/get` for a name with no stored object.
pub const FILE_NOT_FOUND: &str = "Error: File not found in the server.";

/// Reply to `/dir` when the storage directory cannot be read.
pub const DIR_FAILED: &str = "Error: Unable to list directory.";

/// First line of every `/dir` listing.
pub const DIR_HEADER: &str = "Server Directory:";

/// Listing body when nothing is stored.
pub const NO_FILES: &str = "No files found.";

/// Prefix of the reply that precedes an upload payload.
pub const READY_TO_RECEIVE: &str = "Ready to receive";

/// Prefix of the reply that precedes a download payload.
pub const READY_TO_SEND: &str = "Ready to send";

/// Timestamp layout used in upload notes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reply to `/?`.
pub const HELP: &str = "Available commands:
/join <server_ip> <port> - Join the server
/register <handle> - Register a handle
/store <filename> - Upload a file to the server
/get <filename> - Download a file from the server
/dir - List files available on the server
/leave - Disconnect from the server
/? - Show this help message";

/// Whether a reply reports a failure.
pub fn is_error(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}

pub fn welcome(handle: &str) -> String {
    format!("Welcome {handle}!")
}

/// Reply to `/register` from a session that already holds a handle.
pub fn already_registered(handle: &str) -> String {
    format!("Error: Registration failed. You are already registered as {handle}.")
}

pub fn ready_to_receive(filename: &str) -> String {
    format!("{READY_TO_RECEIVE} {filename}")
}

pub fn ready_to_send(filename: &str) -> String {
    format!("{READY_TO_SEND} {filename}")
}

pub fn upload_failed(reason: impl std::fmt::Display) -> String {
    format!("Error: File upload failed - {reason}")
}

pub fn download_failed(reason: impl std::fmt::Display) -> String {
    format!("Error: File download failed - {reason}")
}

pub fn invalid_filename(filename: &str) -> String {
    format!("Error: Invalid filename {filename}.")
}

/// Confirmation sent after an upload completes: `<handle><timestamp>: Uploaded <filename>`.
pub fn upload_note<Tz>(handle: &str, at: &DateTime<Tz>, filename: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{handle}<{}>: Uploaded {filename}",
        at.format(TIMESTAMP_FORMAT)
    )
}

/// `/dir` listing: header line followed by one name per line.
pub fn directory<S: AsRef<str>>(names: &[S]) -> String {
    if names.is_empty() {
        return format!("{DIR_HEADER}\n{NO_FILES}");
    }
    let body: Vec<&str> = names.iter().map(|name| name.as_ref()).collect();
    format!("{DIR_HEADER}\n{}", body.join("\n"))
}
