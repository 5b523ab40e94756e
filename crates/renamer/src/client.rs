//! Daemon connection client for the renamer CLI.
//!
//! This module provides the `DaemonClient` which handles:
//! - Connection to the daemon via Unix socket, with bounded backoff
//! - The `Connect` handshake and protocol version check
//! - Line-delimited JSON framing in both directions
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{debug, info};

use renamer_core::{SessionKey, StatusView};
use renamer_protocol::{ClientMessage, DaemonMessage, ProtocolVersion, MAX_MESSAGE_SIZE};

use crate::error::{CliError, Result};

/// Default socket path, shared with the daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/renamer.sock";

/// Environment variable overriding the socket path.
pub const ENV_SOCKET: &str = "RENAMER_SOCKET";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the daemon client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path to the Unix socket where the daemon listens.
    pub socket_path: PathBuf,

    /// Connection attempts before giving up.
    pub connect_attempts: u32,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            connect_attempts: 5,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(2),
            retry_multiplier: 2.0,
        }
    }
}

impl ClientConfig {
    /// Default configuration with the socket taken from `RENAMER_SOCKET`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(ENV_SOCKET) {
            config.socket_path = PathBuf::from(path);
        }
        config
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Read half of a daemon connection.
pub struct MessageReader {
    reader: BufReader<OwnedReadHalf>,
}

impl MessageReader {
    /// Reads the next daemon message.
    ///
    /// # Errors
    ///
    /// `CliError::ProtocolError` when the daemon closes the connection or
    /// sends an oversized line; `ParseError` for malformed JSON.
    pub async fn recv(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(CliError::ProtocolError(
                "daemon closed the connection".to_string(),
            ));
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(CliError::ProtocolError(format!(
                "message too large ({} bytes)",
                line.len()
            )));
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Write half of a daemon connection.
pub struct MessageWriter {
    writer: OwnedWriteHalf,
}

impl MessageWriter {
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

// ============================================================================
// Daemon Client
// ============================================================================

/// A handshaken connection to the daemon, bound to one session key.
pub struct DaemonClient {
    reader: MessageReader,
    writer: MessageWriter,
    key: SessionKey,
}

impl DaemonClient {
    /// Connects and performs the handshake.
    ///
    /// `client_id` becomes the session key. Without one the daemon assigns
    /// a per-connection key.
    pub async fn connect(config: &ClientConfig, client_id: Option<String>) -> Result<Self> {
        let stream = connect_with_retry(config).await?;
        let (reader, writer) = stream.into_split();
        let mut reader = MessageReader {
            reader: BufReader::new(reader),
        };
        let mut writer = MessageWriter { writer };

        writer.send(&ClientMessage::connect(client_id)).await?;

        match reader.recv().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(CliError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(
                    key = %client_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                Ok(Self {
                    reader,
                    writer,
                    key: SessionKey::new(client_id),
                })
            }
            DaemonMessage::Rejected { reason, .. } => Err(CliError::Rejected(reason)),
            other => Err(CliError::ProtocolError(format!(
                "expected Connected, got {other:?}"
            ))),
        }
    }

    /// The session key the daemon bound this connection to.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        self.writer.send(msg).await
    }

    pub async fn recv(&mut self) -> Result<DaemonMessage> {
        self.reader.recv().await
    }

    /// Requests the live sessions.
    pub async fn list_sessions(&mut self) -> Result<Vec<StatusView>> {
        self.send(&ClientMessage::list_sessions()).await?;
        loop {
            match self.recv().await? {
                DaemonMessage::SessionList { sessions } => return Ok(sessions),
                DaemonMessage::Error {
                    message,
                    next_action,
                    ..
                } => return Err(CliError::Daemon { message, next_action }),
                other => debug!(message = ?other, "Skipping push while listing"),
            }
        }
    }

    /// Tells the daemon we are leaving. The session itself is not touched.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await
    }

    /// Splits the connection for concurrent reading and writing.
    pub fn into_parts(self) -> (MessageReader, MessageWriter, SessionKey) {
        (self.reader, self.writer, self.key)
    }
}

/// Connects to the daemon socket with exponential backoff.
async fn connect_with_retry(config: &ClientConfig) -> Result<UnixStream> {
    let attempts = config.connect_attempts.max(1);
    let mut delay = config.retry_initial_delay;
    let mut last_error = String::from("socket not found");

    for attempt in 1..=attempts {
        debug!(
            attempt,
            socket_path = %config.socket_path.display(),
            "Attempting to connect to daemon"
        );

        if config.socket_path.exists() {
            match UnixStream::connect(&config.socket_path).await {
                Ok(stream) => {
                    debug!(attempt, "Connection successful");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Connection attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        if attempt < attempts {
            sleep(delay).await;
            let next_delay_ms = (delay.as_millis() as f64 * config.retry_multiplier) as u64;
            delay = Duration::from_millis(next_delay_ms).min(config.retry_max_delay);
        }
    }

    Err(CliError::DaemonConnection(format!(
        "{} ({last_error})",
        config.socket_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    fn test_config(socket_path: PathBuf) -> ClientConfig {
        ClientConfig {
            socket_path,
            connect_attempts: 2,
            retry_initial_delay: Duration::from_millis(1),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert!(config.connect_attempts > 1);
    }

    #[tokio::test]
    async fn test_missing_socket_fails_after_attempts() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path().join("absent.sock"));

        let err = DaemonClient::connect(&config, None).await.err().unwrap();
        assert!(matches!(err, CliError::DaemonConnection(_)));
        assert!(err.to_string().contains("absent.sock"));
    }

    #[tokio::test]
    async fn test_handshake_against_fake_daemon() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("fake.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let hello: ClientMessage = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(hello, ClientMessage::connect(Some("alice".to_string())));

            let reply = serde_json::to_string(&DaemonMessage::connected("alice".into())).unwrap();
            writer.write_all(reply.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        });

        let client = DaemonClient::connect(&test_config(socket_path), Some("alice".into()))
            .await
            .unwrap();
        assert_eq!(client.key().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("reject.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();

            let reply = serde_json::to_string(&DaemonMessage::rejected("too many clients")).unwrap();
            writer.write_all(reply.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        });

        let err = DaemonClient::connect(&test_config(socket_path), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CliError::Rejected(reason) if reason == "too many clients"));
    }
}
