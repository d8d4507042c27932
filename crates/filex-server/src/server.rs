//! TCP acceptor.
//!
//! Binds the configured address and spawns one connection task per
//! accepted client. A failing connection never affects the acceptor or
//! any other connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::dispatcher::Dispatcher;
use crate::registry::Registry;
use crate::storage::Storage;

/// The file exchange server.
pub struct FileServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl FileServer {
    /// Creates a server, preparing the storage directory.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        let storage = Storage::open(&config.storage_dir, config.allow_unsafe_names).await?;
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()), storage);
        Ok(Arc::new(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The handle registry shared by all connections.
    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`bind`](Self::bind).
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stops accepting and asks every connection task to finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address with the configured backlog.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.bind_addr().await?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.config.backlog)?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("file server listening on {local_addr}");
        Ok(listener)
    }

    /// Binds and serves until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until [`shutdown`](Self::shutdown).
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::warn!(%peer_addr, "failed to set TCP_NODELAY: {e}");
                            }
                            tokio::spawn(handle_connection(
                                stream,
                                peer_addr,
                                Arc::clone(&self.dispatcher),
                                self.cancel.child_token(),
                            ));
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}
