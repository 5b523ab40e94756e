//! Error types for the renamer CLI.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::io;
use thiserror::Error;

use renamer_core::NextAction;

// ============================================================================
// CLI Error Type
// ============================================================================

/// Errors surfaced to the user by the CLI.
#[derive(Error, Debug)]
pub enum CliError {
    /// Could not reach the daemon socket.
    ///
    /// Usually the daemon is not running; `renamerd start -d` starts it.
    #[error("Failed to connect to daemon: {0}")]
    DaemonConnection(String),

    /// The daemon speaks an incompatible protocol version.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon refused the handshake.
    #[error("Daemon rejected the connection: {0}")]
    Rejected(String),

    /// The daemon answered a request with an error.
    #[error("{message}")]
    Daemon {
        message: String,
        next_action: Option<NextAction>,
    },

    /// An unexpected message or a closed stream.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A command line that could not be turned into an action.
    #[error("{0}")]
    InvalidCommand(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl CliError {
    /// The suggested next step, if the daemon gave one.
    pub fn next_action(&self) -> Option<NextAction> {
        match self {
            Self::Daemon { next_action, .. } => *next_action,
            Self::InvalidCommand(_) => Some(NextAction::FixInput),
            _ => None,
        }
    }
}

/// Convenience Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;
