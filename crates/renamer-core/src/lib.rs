//! Renamer Core - Domain types and the filename transform pipeline
//!
//! This crate provides the session model and the pure rename pipeline shared
//! between the daemon (renamerd) and the CLI client (renamer). It performs no
//! I/O.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod directive;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod validate;

// Re-exports for convenience
pub use directive::{
    Action, CaseMode, Directives, ReplacePair, SummaryEntry, Timestamp, TimestampFormat,
};
pub use error::{DomainError, DomainResult, NextAction};
pub use pipeline::{preview, sanitize, split_name, FALLBACK_STEM, MAX_FILENAME_BYTES};
pub use session::{Session, SessionKey, SessionState, StatusView, TerminationReason, UiRef};
pub use validate::{is_illegal_char, validate_text, MAX_INPUT_CHARS};
