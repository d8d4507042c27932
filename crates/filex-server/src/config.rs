//! Server configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it
//! wants to change:
//!
//! ```json
//! { "host": "0.0.0.0", "port": 9000, "storageDir": "/srv/filex" }
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use filex_protocol::{DEFAULT_HOST, DEFAULT_PORT};

use crate::ServerError;

/// Listen backlog used when none is configured.
pub const DEFAULT_BACKLOG: u32 = 5;

/// Directory for stored objects when none is configured.
pub const DEFAULT_STORAGE_DIR: &str = "uploads";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host name or IP address to bind.
    pub host: String,

    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,

    /// Pending-connection queue length passed to `listen(2)`.
    pub backlog: u32,

    /// Directory holding stored objects.
    pub storage_dir: PathBuf,

    /// Accept object names with path components (`../x`, `a/b`).
    pub allow_unsafe_names: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            allow_unsafe_names: false,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Parses configuration from JSON text.
    pub fn from_json(data: &str) -> Result<Self, ServerError> {
        let config: Self = serde_json::from_str(data)?;
        if config.backlog == 0 {
            return Err(ServerError::Config("backlog must be at least 1".into()));
        }
        Ok(config)
    }

    /// Resolves `host:port` to the first matching socket address.
    pub async fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        addrs
            .next()
            .ok_or_else(|| ServerError::Config(format!("cannot resolve host {}", self.host)))
    }
}
