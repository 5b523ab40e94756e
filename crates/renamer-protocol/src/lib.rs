//! Renamer Protocol - Wire protocol for daemon communication
//!
//! Newline-delimited JSON messages exchanged between the `renamer` CLI and
//! the `renamerd` daemon over a Unix socket.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType, MAX_MESSAGE_SIZE};
pub use version::{ProtocolVersion, VersionError};
