//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Binds the connection to a session key
//! - Routes uploads and actions to the supervisor
//!
//! Session output (status, delivery, termination) never comes from here. It
//! reaches the client through [`super::SocketTransport`], which writes to the
//! same writer registered in the clients map. The handler itself only answers
//! with `Error`, `Pong` and `SessionList`.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use renamer_core::{SessionKey, UiRef};
use renamer_protocol::{
    ClientMessage, DaemonMessage, MessageType, ProtocolVersion, MAX_MESSAGE_SIZE,
};

use crate::intake::Intake;
use crate::supervisor::{Outcome, Supervisor};

/// Shared, lockable writer for one client.
pub type ClientWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// A connected client, reachable by its session key.
pub struct Client {
    pub writer: ClientWriter,
    /// Connection that registered this entry
    pub connection: u64,
}

/// Connected clients keyed by session key.
pub type ClientsMap = Arc<RwLock<HashMap<SessionKey, Client>>>;

/// Maximum number of concurrently connected clients
pub const MAX_CLIENTS: usize = 100;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: ClientWriter,
    supervisor: Supervisor,
    intake: Arc<Intake>,
    clients: ClientsMap,
    /// Session key bound at handshake
    key: Option<SessionKey>,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        supervisor: Supervisor,
        intake: Arc<Intake>,
        clients: ClientsMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            supervisor,
            intake,
            clients,
            key: None,
            connection_number,
        }
    }

    /// Runs the connection handler until the connection closes.
    ///
    /// Returns the bound session key, if the handshake succeeded.
    pub async fn run(mut self) -> Option<SessionKey> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(key = ?self.key, "Client handshake completed");

        if let Err(e) = self.process_messages().await {
            debug!(key = ?self.key, error = %e, "Connection closed");
        }

        self.unregister().await;
        info!(key = ?self.key, "Client disconnected");
        self.key
    }

    /// Expects `Connect`, checks the protocol version and registers the
    /// writer under the session key.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        if let Err(e) = ProtocolVersion::negotiate(&msg.protocol_version) {
            warn!(
                client_version = %msg.protocol_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))
                .await?;
            return Err(ConnectionError::VersionMismatch {
                client: msg.protocol_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        let client_id = match msg.message {
            MessageType::Connect { client_id } => client_id,
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;
                return Err(ConnectionError::UnexpectedMessage(other.name().to_string()));
            }
        };

        let key = match client_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => SessionKey::new(id),
            None => SessionKey::new(format!("client-{}", self.connection_number)),
        };

        {
            let mut clients = self.clients.write().await;
            if clients.len() >= MAX_CLIENTS && !clients.contains_key(&key) {
                drop(clients);
                self.send_message(DaemonMessage::rejected(&format!(
                    "Too many clients (max: {MAX_CLIENTS})"
                )))
                .await?;
                return Err(ConnectionError::TooManyClients { max: MAX_CLIENTS });
            }
            // A reconnect with the same key takes over session output.
            clients.insert(
                key.clone(),
                Client {
                    writer: Arc::clone(&self.writer),
                    connection: self.connection_number,
                },
            );
        }

        self.send_message(DaemonMessage::connected(key.to_string()))
            .await?;
        self.key = Some(key);
        Ok(())
    }

    /// Reads and processes messages until EOF, timeout or an I/O failure.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(key = ?self.key, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(e @ ConnectionError::ParseError(_))) => {
                    // a malformed line is reported, the connection survives
                    warn!(key = ?self.key, error = %e, "Malformed message");
                    self.send_message(DaemonMessage::error_with_action(
                        &e.to_string(),
                        "malformed",
                        renamer_core::NextAction::FixInput,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(key = ?self.key, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            if let Err(e) = self.handle_message(msg).await {
                match e {
                    ConnectionError::Eof => return Ok(()),
                    e => {
                        error!(key = ?self.key, error = %e, "Error handling message");
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        let Some(key) = self.key.clone() else {
            return Err(ConnectionError::UnexpectedMessage(
                msg.message.name().to_string(),
            ));
        };

        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            MessageType::Upload { path, name } => {
                let ui_ref = UiRef::new(format!("conn-{}", self.connection_number));
                let upload = match self
                    .intake
                    .stage(&key, &path, name.as_deref(), Some(ui_ref))
                    .await
                {
                    Ok(upload) => upload,
                    Err(e) => {
                        info!(key = %key, error = %e, "Upload refused");
                        return self
                            .send_message(DaemonMessage::error_with_action(
                                &e.to_string(),
                                e.code(),
                                e.next_action(),
                            ))
                            .await;
                    }
                };
                // the supervisor pushes the first status itself
                if let Err(e) = self.supervisor.open(upload).await {
                    self.send_message(DaemonMessage::error_with_action(
                        &e.to_string(),
                        e.code(),
                        e.next_action(),
                    ))
                    .await?;
                }
            }

            MessageType::Action { action } => {
                match self.supervisor.dispatch(&key, action).await {
                    Ok(outcome) => {
                        debug!(key = %key, outcome = outcome_name(&outcome), "Action handled");
                    }
                    Err(e) => {
                        self.send_message(DaemonMessage::error_with_action(
                            &e.to_string(),
                            e.code(),
                            e.next_action(),
                        ))
                        .await?;
                    }
                }
            }

            MessageType::ListSessions => {
                let sessions = self.supervisor.list().await;
                self.send_message(DaemonMessage::session_list(sessions))
                    .await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(key = %key, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Drops this connection's entry unless a newer connection took the key.
    async fn unregister(&self) {
        let Some(key) = &self.key else {
            return;
        };
        let mut clients = self.clients.write().await;
        if clients
            .get(key)
            .is_some_and(|c| c.connection == self.connection_number)
        {
            clients.remove(key);
            debug!(key = %key, "Removed client writer");
        }
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            key = ?self.key,
            message_type = msg.message.name(),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        send_to(&self.writer, &msg).await
    }
}

fn outcome_name(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Updated(_) => "updated",
        Outcome::Delivered { .. } => "delivered",
        Outcome::DeliveryFailed { .. } => "delivery_failed",
        Outcome::Terminated(_) => "terminated",
    }
}

/// Writes one message line to a client, bounded by [`WRITE_TIMEOUT`].
pub async fn send_to(writer: &ClientWriter, msg: &DaemonMessage) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Too many clients (max: {max})")]
    TooManyClients { max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 2_000_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("2000000"));
    }
}
