//! Client interface for the store actor.
//!
//! `StoreHandle` is cheap to clone and can be shared across tasks. Channel
//! errors are mapped to `StoreError::ChannelClosed`.

use tokio::sync::{mpsc, oneshot};

use renamer_core::{DomainError, Session, SessionKey};

use super::commands::{StoreCommand, StoreError};

/// Handle for interacting with the store actor.
#[derive(Clone)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(sender: mpsc::Sender<StoreCommand>) -> Self {
        Self { sender }
    }

    /// Inserts a new session and returns the stored copy.
    ///
    /// # Errors
    ///
    /// - `StoreError::SessionAlreadyExists` if a live session has this key
    /// - `StoreError::StoreFull` if the store is at capacity
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::Create {
                session: Box::new(session),
                respond_to: tx,
            })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    /// Returns a copy of the session, or `None` if absent or unreachable.
    pub async fn get(&self, key: &SessionKey) -> Option<Session> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::Get {
                key: key.clone(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Applies `mutator` to the live session for `key`.
    ///
    /// The change is all-or-nothing: if the mutator fails, the stored session
    /// is unchanged.
    ///
    /// # Errors
    ///
    /// - `StoreError::SessionExpired` if the key is absent or terminated
    /// - `StoreError::Rejected` if the mutator fails
    /// - `StoreError::ChannelClosed` if the actor has shut down
    pub async fn update<F>(&self, key: &SessionKey, mutator: F) -> Result<Session, StoreError>
    where
        F: FnOnce(&mut Session) -> Result<(), DomainError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::Update {
                key: key.clone(),
                mutator: Box::new(mutator),
                respond_to: tx,
            })
            .await
            .map_err(|_| StoreError::ChannelClosed)?;

        rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    /// Evicts the session for `key`, returning it if it was present.
    pub async fn remove(&self, key: &SessionKey) -> Option<Session> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StoreCommand::Remove {
                key: key.clone(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Returns copies of all sessions, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(StoreCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns true while the actor is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
