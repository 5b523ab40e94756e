//! Store actor commands and errors.
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;

use renamer_core::{DomainError, Session, SessionKey};
use thiserror::Error;
use tokio::sync::oneshot;

/// Mutation applied to a session inside the store actor.
///
/// The actor runs it against a copy and only keeps the copy when it returns `Ok`.
pub type Mutator = Box<dyn FnOnce(&mut Session) -> Result<(), DomainError> + Send>;

// ============================================================================
// Store Commands
// ============================================================================

/// Commands sent to the store actor.
///
/// Each command carries a oneshot channel for the response.
pub enum StoreCommand {
    /// Insert a new session.
    ///
    /// # Errors
    /// - `StoreError::SessionAlreadyExists` if a live session has this key
    /// - `StoreError::StoreFull` if at maximum capacity
    Create {
        session: Box<Session>,
        respond_to: oneshot::Sender<Result<Session, StoreError>>,
    },

    /// Get a copy of a session by key.
    Get {
        key: SessionKey,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Apply a mutator to a live session and return the result.
    ///
    /// # Errors
    /// - `StoreError::SessionExpired` if the key is absent or terminated
    /// - `StoreError::Rejected` if the mutator fails
    Update {
        key: SessionKey,
        mutator: Mutator,
        respond_to: oneshot::Sender<Result<Session, StoreError>>,
    },

    /// Evict a session, returning it if it was present.
    Remove {
        key: SessionKey,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Copies of all sessions.
    List {
        respond_to: oneshot::Sender<Vec<Session>>,
    },
}

impl fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { session, .. } => {
                f.debug_struct("Create").field("key", &session.key).finish()
            }
            Self::Get { key, .. } => f.debug_struct("Get").field("key", key).finish(),
            Self::Update { key, .. } => f.debug_struct("Update").field("key", key).finish(),
            Self::Remove { key, .. } => f.debug_struct("Remove").field("key", key).finish(),
            Self::List { .. } => f.write_str("List"),
        }
    }
}

// ============================================================================
// Store Errors
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store has reached its maximum session capacity.
    #[error("too many active sessions (max: {max})")]
    StoreFull { max: usize },

    /// A live session with this key already exists.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionKey),

    /// No live session for this key.
    #[error("session expired: {0}")]
    SessionExpired(SessionKey),

    /// The mutator refused the change. The session is unchanged.
    #[error(transparent)]
    Rejected(#[from] DomainError),

    /// The actor stopped before answering.
    #[error("response channel closed")]
    ChannelClosed,
}
