//! Unix socket server for the renamer daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Keeps the clients map that [`SocketTransport`] pushes session output to
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐ upload ┌──────────┐
//! │ConnectionHandler│───────▶│  Intake  │
//! │   (per client)  │        └──────────┘
//! └───────┬─────────┘
//!         │ open / dispatch
//!         ▼
//! ┌─────────────────┐        ┌─────────────────┐
//! │   Supervisor    │───────▶│ SocketTransport │──▶ ClientsMap ──▶ client
//! └─────────────────┘        └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Server errors are logged and allow continued operation

mod connection;
mod transport;

pub use connection::{
    send_to, Client, ClientWriter, ClientsMap, ConnectionError, ConnectionHandler, MAX_CLIENTS,
    WRITE_TIMEOUT,
};
pub use transport::SocketTransport;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::intake::Intake;
use crate::supervisor::Supervisor;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/renamer.sock";

/// Creates an empty clients map, shared by the server and its transport.
pub fn new_clients_map() -> ClientsMap {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Unix socket server for the renamer daemon.
pub struct DaemonServer {
    socket_path: PathBuf,
    supervisor: Supervisor,
    intake: Arc<Intake>,
    /// Connected clients (keyed by session key)
    clients: ClientsMap,
    cancel_token: CancellationToken,
    /// Connection counter for generating default keys
    connection_counter: AtomicU64,
}

impl DaemonServer {
    /// Creates a new daemon server.
    ///
    /// `clients` must be the map the supervisor's [`SocketTransport`] was
    /// built with, otherwise session output has nowhere to go.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        supervisor: Supervisor,
        intake: Intake,
        clients: ClientsMap,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            supervisor,
            intake: Arc::new(intake),
            clients,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_err)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_err)?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(setup_err)?;

        info!(
            socket = %self.socket_path.display(),
            "Daemon server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.supervisor.clone(),
            Arc::clone(&self.intake),
            Arc::clone(&self.clients),
            connection_number,
        );
        tokio::spawn(handler.run());
    }

    /// Number of clients that completed the handshake.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Terminates live sessions, drops clients and removes the socket file.
    async fn cleanup(&self) {
        self.supervisor.shutdown().await;

        self.clients.write().await.clear();

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
