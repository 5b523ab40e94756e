//! Store actor - owns all session records and processes commands.
//!
//! The actor runs in a single task and handles commands one at a time, so no
//! two mutations of the same record ever interleave.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the caller went away)

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use renamer_core::{Session, SessionKey};

use super::commands::{Mutator, StoreCommand, StoreError};

/// Default maximum number of concurrent sessions.
pub const MAX_SESSIONS: usize = 100;

/// The store actor.
pub struct StoreActor {
    receiver: mpsc::Receiver<StoreCommand>,
    sessions: HashMap<SessionKey, Session>,
    max_sessions: usize,
}

impl StoreActor {
    pub fn new(receiver: mpsc::Receiver<StoreCommand>, max_sessions: usize) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    /// Runs the actor loop until every handle has been dropped.
    pub async fn run(mut self) {
        info!(max_sessions = self.max_sessions, "Session store starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Session store stopped");
    }

    fn handle_command(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Create {
                session,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_create(*session));
            }
            StoreCommand::Get { key, respond_to } => {
                let _ = respond_to.send(self.sessions.get(&key).cloned());
            }
            StoreCommand::Update {
                key,
                mutator,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_update(&key, mutator));
            }
            StoreCommand::Remove { key, respond_to } => {
                let removed = self.sessions.remove(&key);
                if removed.is_some() {
                    debug!(key = %key, remaining = self.sessions.len(), "Session evicted");
                }
                let _ = respond_to.send(removed);
            }
            StoreCommand::List { respond_to } => {
                let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
                sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                let _ = respond_to.send(sessions);
            }
        }
    }

    fn handle_create(&mut self, session: Session) -> Result<Session, StoreError> {
        if let Some(existing) = self.sessions.get(&session.key) {
            if existing.is_live() {
                debug!(key = %session.key, "Session already exists, rejecting create");
                return Err(StoreError::SessionAlreadyExists(session.key));
            }
        }

        // A terminated record for the same key does not count against capacity.
        let occupied = self
            .sessions
            .iter()
            .filter(|(k, s)| **k != session.key && s.is_live())
            .count();
        if occupied >= self.max_sessions {
            warn!(
                key = %session.key,
                current = occupied,
                max = self.max_sessions,
                "Store is full, rejecting session"
            );
            return Err(StoreError::StoreFull {
                max: self.max_sessions,
            });
        }

        debug!(key = %session.key, artifact = %session.artifact_path.display(), "Session created");
        self.sessions.insert(session.key.clone(), session.clone());
        Ok(session)
    }

    fn handle_update(&mut self, key: &SessionKey, mutator: Mutator) -> Result<Session, StoreError> {
        let current = match self.sessions.get(key) {
            Some(session) if session.is_live() => session,
            _ => return Err(StoreError::SessionExpired(key.clone())),
        };

        let mut updated = current.clone();
        mutator(&mut updated)?;

        self.sessions.insert(key.clone(), updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renamer_core::{Action, DomainError, SessionState};

    fn create_test_actor(max: usize) -> StoreActor {
        let (_tx, rx) = mpsc::channel(1);
        StoreActor::new(rx, max)
    }

    fn create_test_session(key: &str) -> Session {
        Session::new(SessionKey::new(key), "report.pdf", format!("/tmp/{key}/report.pdf"), None)
    }

    #[test]
    fn test_create_and_duplicate() {
        let mut actor = create_test_actor(10);
        assert!(actor.handle_create(create_test_session("a")).is_ok());
        assert_eq!(
            actor.handle_create(create_test_session("a")),
            Err(StoreError::SessionAlreadyExists(SessionKey::new("a")))
        );
    }

    #[test]
    fn test_create_over_terminated_record() {
        let mut actor = create_test_actor(10);
        let mut session = create_test_session("a");
        session.mark_terminated();
        actor.sessions.insert(session.key.clone(), session);

        assert!(actor.handle_create(create_test_session("a")).is_ok());
    }

    #[test]
    fn test_capacity() {
        let mut actor = create_test_actor(2);
        actor.handle_create(create_test_session("a")).unwrap();
        actor.handle_create(create_test_session("b")).unwrap();
        assert_eq!(
            actor.handle_create(create_test_session("c")),
            Err(StoreError::StoreFull { max: 2 })
        );
    }

    #[test]
    fn test_update_rejected_leaves_session_unchanged() {
        let mut actor = create_test_actor(10);
        actor.handle_create(create_test_session("a")).unwrap();

        let result = actor.handle_update(
            &SessionKey::new("a"),
            Box::new(|s: &mut Session| {
                s.directives.prefix = "partial".to_string();
                Err(DomainError::invalid_input("prefix", "nope"))
            }),
        );
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(actor.sessions[&SessionKey::new("a")].directives.prefix, "");
    }

    #[test]
    fn test_update_absent_or_terminated_is_expired() {
        let mut actor = create_test_actor(10);
        let key = SessionKey::new("ghost");
        let noop: Mutator = Box::new(|_| Ok(()));
        assert_eq!(
            actor.handle_update(&key, noop),
            Err(StoreError::SessionExpired(key.clone()))
        );

        let mut session = create_test_session("ghost");
        session.mark_terminated();
        actor.sessions.insert(key.clone(), session);
        let noop: Mutator = Box::new(|_| Ok(()));
        assert_eq!(
            actor.handle_update(&key, noop),
            Err(StoreError::SessionExpired(key))
        );
    }

    #[test]
    fn test_update_applies_directive() {
        let mut actor = create_test_actor(10);
        actor.handle_create(create_test_session("a")).unwrap();

        let updated = actor
            .handle_update(
                &SessionKey::new("a"),
                Box::new(|s: &mut Session| {
                    s.apply_directive(
                        &Action::SetSuffix { text: "_v2".into() },
                        &chrono::Local::now(),
                    )
                }),
            )
            .unwrap();
        assert_eq!(updated.preview(), "report_v2.pdf");
        assert_eq!(updated.state, SessionState::CollectingDirectives);
    }
}
