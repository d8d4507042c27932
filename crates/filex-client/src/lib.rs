//! Async client for the filex file exchange.
//!
//! Wraps one server connection and exposes each protocol command as a
//! method. Short command replies are bounded by a timeout; payload
//! transfers are not.

mod client;
mod error;

pub use client::FileClient;
pub use error::ClientError;

use std::time::Duration;

/// Timeout for establishing the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
