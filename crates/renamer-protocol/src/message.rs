//! Protocol message types for daemon communication.
//!
//! Every message is one JSON object terminated by `\n`.

use crate::version::ProtocolVersion;
use renamer_core::{Action, NextAction, StatusView, TerminationReason};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum size of a single protocol line (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake. The client id becomes the session key.
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Hand a local file to the daemon, starting a new session.
    Upload {
        /// Path readable by the daemon
        path: PathBuf,
        /// Display name (defaults to the file name of `path`)
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// A directive, commit or cancel for the connection's session
    Action { action: Action },

    /// Request the list of live sessions
    ListSessions,

    /// Ping to check connection
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

impl MessageType {
    /// Returns the wire name of this message type, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Upload { .. } => "upload",
            Self::Action { .. } => "action",
            Self::ListSessions => "list_sessions",
            Self::Ping { .. } => "ping",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn upload(path: impl Into<PathBuf>, name: Option<String>) -> Self {
        Self::new(MessageType::Upload {
            path: path.into(),
            name,
        })
    }

    pub fn action(action: Action) -> Self {
        Self::new(MessageType::Action { action })
    }

    pub fn list_sessions() -> Self {
        Self::new(MessageType::ListSessions)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        protocol_version: ProtocolVersion,
        /// Session key bound to this connection
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Preview and directive summary after a state-preserving transition
    Status { status: Box<StatusView> },

    /// The renamed file was handed over
    Delivered {
        name: String,
        /// Where the delivered copy was placed
        path: PathBuf,
    },

    /// Every delivery attempt of a round failed. The renamed file is kept.
    DeliveryFailed {
        message: String,
        attempts: u32,
        rounds_left: u32,
    },

    /// The session ended
    Terminated { reason: TerminationReason },

    /// Live sessions
    SessionList { sessions: Vec<StatusView> },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_action: Option<NextAction>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn status(status: StatusView) -> Self {
        Self::Status {
            status: Box::new(status),
        }
    }

    pub fn delivered(name: String, path: PathBuf) -> Self {
        Self::Delivered { name, path }
    }

    pub fn delivery_failed(message: String, attempts: u32, rounds_left: u32) -> Self {
        Self::DeliveryFailed {
            message,
            attempts,
            rounds_left,
        }
    }

    pub fn terminated(reason: TerminationReason) -> Self {
        Self::Terminated { reason }
    }

    pub fn session_list(sessions: Vec<StatusView>) -> Self {
        Self::SessionList { sessions }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
            next_action: None,
        }
    }

    /// Creates an error response with a code and a next step for the user.
    pub fn error_with_action(message: &str, code: &str, next_action: NextAction) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
            next_action: Some(next_action),
        }
    }

    /// Returns true for messages that end the session.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}
