use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use filex_server::{FileServer, ServerConfig};

/// File exchange server: clients register a handle, then store, list and
/// fetch files over TCP.
#[derive(Parser, Debug)]
#[command(name = "filex-server", version, about)]
struct Args {
    /// JSON configuration file. Flags below override its values.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Host or IP address to bind.
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, short)]
    port: Option<u16>,

    /// Directory holding stored files.
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Listen backlog.
    #[arg(long)]
    backlog: Option<u32>,

    /// Accept file names containing path components.
    #[arg(long)]
    allow_unsafe_names: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.storage_dir {
            config.storage_dir = dir;
        }
        if let Some(backlog) = self.backlog {
            anyhow::ensure!(backlog > 0, "backlog must be at least 1");
            config.backlog = backlog;
        }
        if self.allow_unsafe_names {
            config.allow_unsafe_names = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,filex=debug")),
        )
        .init();

    let config = Args::parse().into_config()?;
    if config.allow_unsafe_names {
        tracing::warn!("unsafe file names allowed: clients may write outside the storage directory");
    }

    let server = FileServer::new(config).await?;

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
