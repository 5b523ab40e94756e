//! Socket-backed [`Transport`]: pushes session output to the connected client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use renamer_core::{SessionKey, StatusView};
use renamer_protocol::DaemonMessage;

use super::connection::{send_to, ClientWriter, ClientsMap, ConnectionError, WRITE_TIMEOUT};
use crate::cleanup::safe_remove;
use crate::delivery::{Notice, Transport, TransportError};
use crate::rename;

/// Delivers files into an outbox directory and notifies the client owning
/// the session key.
pub struct SocketTransport {
    outbox_dir: PathBuf,
    clients: ClientsMap,
}

impl SocketTransport {
    pub fn new(outbox_dir: impl Into<PathBuf>, clients: ClientsMap) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            clients,
        }
    }

    async fn writer_for(&self, key: &SessionKey) -> Option<ClientWriter> {
        self.clients
            .read()
            .await
            .get(key)
            .map(|c| std::sync::Arc::clone(&c.writer))
    }

    /// Best-effort push. Failures are logged.
    async fn push(&self, key: &SessionKey, msg: DaemonMessage) {
        let Some(writer) = self.writer_for(key).await else {
            debug!(key = %key, "No client connected, dropping push");
            return;
        };
        if let Err(e) = send_to(&writer, &msg).await {
            warn!(key = %key, error = %e, "Failed to push to client");
        }
    }

    /// Copies the artifact into `outbox/<key>/<name>` without overwriting.
    async fn place(
        &self,
        key: &SessionKey,
        artifact: &Path,
        display_name: &str,
    ) -> Result<PathBuf, TransportError> {
        let dir = self.outbox_dir.join(key.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransportError::Io(format!("{}: {e}", dir.display())))?;

        let dest = rename::resolve_collision(&dir.join(display_name))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        tokio::fs::copy(artifact, &dest)
            .await
            .map_err(|e| TransportError::Io(format!("{}: {e}", dest.display())))?;
        Ok(dest)
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn deliver(
        &self,
        key: &SessionKey,
        artifact: &Path,
        display_name: &str,
    ) -> Result<(), TransportError> {
        let writer = self
            .writer_for(key)
            .await
            .ok_or_else(|| TransportError::Unavailable(format!("no client connected for {key}")))?;

        let dest = self.place(key, artifact, display_name).await?;

        let msg = DaemonMessage::delivered(display_name.to_string(), dest.clone());
        match send_to(&writer, &msg).await {
            Ok(()) => {
                info!(key = %key, path = %dest.display(), "File delivered");
                Ok(())
            }
            Err(e) => {
                safe_remove(&dest).await;
                Err(match e {
                    ConnectionError::WriteTimeout => TransportError::Timeout(WRITE_TIMEOUT),
                    other => TransportError::Unavailable(other.to_string()),
                })
            }
        }
    }

    async fn render(&self, status: &StatusView) {
        self.push(&status.key, DaemonMessage::status(status.clone()))
            .await;
    }

    async fn notify(&self, key: &SessionKey, notice: Notice) {
        let msg = match notice {
            Notice::DeliveryFailed {
                message,
                attempts,
                rounds_left,
            } => DaemonMessage::delivery_failed(message, attempts, rounds_left),
            Notice::Terminated(reason) => DaemonMessage::terminated(reason),
        };
        self.push(key, msg).await;
    }
}
