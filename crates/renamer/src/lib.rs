//! renamer CLI - Library modules
//!
//! The client side of renamer: a socket client for the daemon, the
//! slash-command parser for the chat-style editor, and plain-text rendering of
//! daemon messages.
//!
//! # Architecture
//!
//! `renamer edit` runs two tasks that share a `CancellationToken`:
//!
//! 1. **Reader Task**: reads daemon messages and forwards them to the loop
//! 2. **Main Loop**: reads stdin lines, parses slash-commands, sends actions,
//!    and prints whatever the daemon pushes

pub mod client;
pub mod command;
pub mod daemon;
pub mod error;
pub mod render;
pub mod session;

// Re-export commonly used types
pub use client::{ClientConfig, DaemonClient};
pub use command::{parse_line, Command};
pub use error::{CliError, Result};
