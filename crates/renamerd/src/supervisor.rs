//! Lifecycle supervisor: drives each session's state machine.
//!
//! Every live session has its own worker task and event queue. A worker
//! handles one event at a time, which serializes everything that happens to a
//! key. Workers for different keys run in parallel.
//!
//! ```text
//!                 directive / reset
//!                ┌───────────────┐
//!                ▼               │
//!   open ──▶ CollectingDirectives ──commit──▶ Committing ──delivered──▶ Terminated
//!                │   ▲                          │
//!                │   └── rename or delivery ────┘
//!                │       failure (retryable)
//!                └── cancel / timeout / replaced / shutdown ─────────▶ Terminated
//! ```
//!
//! The inactivity deadline is only observed between events, so a cancel or
//! timeout that arrives during a commit waits for the commit to resolve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use renamer_core::{
    Action, DomainError, NextAction, Session, SessionKey, StatusView, TerminationReason,
};

use crate::cleanup::{remove_dir_if_empty, safe_remove};
use crate::config::DaemonConfig;
use crate::delivery::{DeliveryService, Notice, Transport, TransportError};
use crate::intake::Upload;
use crate::rename;
use crate::store::{StoreError, StoreHandle};

/// Per-session event queue depth.
const EVENT_BUFFER: usize = 32;

// ============================================================================
// Errors and Outcomes
// ============================================================================

/// User-visible failures of a session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bad directive input, or an action the current state does not accept.
    #[error(transparent)]
    Validation(DomainError),

    /// No live session for this key.
    #[error("no active session for {0}")]
    SessionExpired(SessionKey),

    /// A filesystem hiccup during commit. The session is back to collecting.
    #[error("could not rename the file: {0}")]
    TransientIo(String),

    /// A filesystem failure that ended the session.
    #[error("storage failure: {0}")]
    TerminalIo(String),

    /// Delivery failed.
    #[error(transparent)]
    Transport(TransportError),

    /// The daemon cannot take the request right now.
    #[error("service busy: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// What the user should do next.
    pub fn next_action(&self) -> NextAction {
        match self {
            Self::Validation(e) => e.next_action(),
            Self::SessionExpired(_) => NextAction::Reupload,
            Self::TransientIo(_) | Self::Unavailable(_) => NextAction::Retry,
            Self::TerminalIo(_) => NextAction::ContactSupport,
            Self::Transport(e) if e.is_transient() => NextAction::Retry,
            Self::Transport(_) => NextAction::ContactSupport,
        }
    }

    /// Short machine-readable code for protocol errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::SessionExpired(_) => "session_expired",
            Self::TransientIo(_) => "transient_io",
            Self::TerminalIo(_) => "terminal_io",
            Self::Transport(_) => "transport",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => Self::Validation(e),
            StoreError::SessionExpired(key) => Self::SessionExpired(key),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Result of a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Directives changed. Carries the refreshed preview.
    Updated(StatusView),
    /// The renamed file was delivered and the session closed.
    Delivered { name: String },
    /// Delivery failed; the renamed file is kept and the session stays open.
    DeliveryFailed {
        status: StatusView,
        attempts: u32,
        rounds_left: u32,
    },
    /// The session ended.
    Terminated(TerminationReason),
}

type Reply = oneshot::Sender<Result<Outcome, EngineError>>;

// ============================================================================
// Settings
// ============================================================================

/// Supervisor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Inactivity window after which a session times out.
    pub session_timeout: Duration,
    /// Failed delivery rounds before the session is given up.
    pub max_delivery_rounds: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(600),
            max_delivery_rounds: 3,
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            session_timeout: config.session_timeout(),
            max_delivery_rounds: config.max_delivery_rounds,
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Events a worker processes, in arrival order.
#[derive(Debug)]
enum Event {
    Action(Action),
    Replaced,
    Shutdown,
}

struct Envelope {
    event: Event,
    reply: Option<Reply>,
}

struct WorkerHandle {
    generation: u64,
    events: mpsc::Sender<Envelope>,
}

type WorkerMap = Arc<Mutex<HashMap<SessionKey, WorkerHandle>>>;

/// Owns the live sessions. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: StoreHandle,
    delivery: DeliveryService,
    settings: SupervisorSettings,
    workers: WorkerMap,
    next_generation: AtomicU64,
    /// Serializes `open` per key so two uploads for one key cannot interleave.
    open_locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Supervisor {
    pub fn new(store: StoreHandle, delivery: DeliveryService, settings: SupervisorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                delivery,
                settings,
                workers: Arc::new(Mutex::new(HashMap::new())),
                next_generation: AtomicU64::new(1),
                open_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.inner.delivery.transport()
    }

    /// Opens a session for a staged upload.
    ///
    /// A live session for the same key is terminated (reason `Replaced`) and
    /// its artifact released before the new one is created. If the session
    /// cannot be created, the staged artifact is removed.
    pub async fn open(&self, upload: Upload) -> Result<StatusView, EngineError> {
        let key = upload.key.clone();
        let lock = self.open_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.open_locked(upload).await
        };
        self.release_open_lock(&key, &lock);
        result
    }

    fn open_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        match self.inner.open_locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(key.clone()).or_default()),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Drops the key's lock once no other `open` holds or waits on it.
    fn release_open_lock(&self, key: &SessionKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut locks) = self.inner.open_locks.lock() {
            // one reference in the map, one here
            if Arc::strong_count(lock) == 2 {
                locks.remove(key);
            }
        }
    }

    async fn open_locked(&self, upload: Upload) -> Result<StatusView, EngineError> {
        let key = upload.key.clone();

        if let Some(old) = self.take_worker(&key) {
            info!(key = %key, "Replacing live session");
            let (tx, rx) = oneshot::channel();
            let sent = old
                .events
                .send(Envelope {
                    event: Event::Replaced,
                    reply: Some(tx),
                })
                .await;
            if sent.is_ok() {
                let _ = rx.await;
            }
        }

        // A record left without a worker is released here.
        if let Some(stale) = self.inner.store.remove(&key).await {
            warn!(key = %key, "Releasing orphaned session record");
            safe_remove(&stale.artifact_path).await;
        }

        let session = Session::new(
            key.clone(),
            &upload.original_name,
            upload.artifact_path.clone(),
            upload.ui_ref.clone(),
        );
        let session = match self.inner.store.create(session).await {
            Ok(session) => session,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not open session, releasing upload");
                safe_remove(&upload.artifact_path).await;
                return Err(e.into());
            }
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        if let Ok(mut workers) = self.inner.workers.lock() {
            workers.insert(
                key.clone(),
                WorkerHandle {
                    generation,
                    events: events_tx,
                },
            );
        }

        let worker = Worker {
            key: key.clone(),
            generation,
            store: self.inner.store.clone(),
            delivery: self.inner.delivery.clone(),
            settings: self.inner.settings.clone(),
            workers: Arc::clone(&self.inner.workers),
            events: events_rx,
        };
        tokio::spawn(worker.run());

        info!(
            key = %key,
            name = %session.original_name,
            size_bytes = upload.size_bytes,
            "Session opened"
        );

        let status = session.status_view();
        self.transport().render(&status).await;
        Ok(status)
    }

    /// Sends an action to the session for `key` and waits for the outcome.
    ///
    /// # Errors
    ///
    /// `EngineError::SessionExpired` if no live session exists or it ends
    /// before handling the action; otherwise whatever the action produced.
    pub async fn dispatch(&self, key: &SessionKey, action: Action) -> Result<Outcome, EngineError> {
        debug!(key = %key, action = action.name(), "Dispatching action");
        self.send(key, Event::Action(action)).await
    }

    async fn send(&self, key: &SessionKey, event: Event) -> Result<Outcome, EngineError> {
        let sender = self
            .inner
            .workers
            .lock()
            .ok()
            .and_then(|workers| workers.get(key).map(|w| w.events.clone()))
            .ok_or_else(|| EngineError::SessionExpired(key.clone()))?;

        let (tx, rx) = oneshot::channel();
        sender
            .send(Envelope {
                event,
                reply: Some(tx),
            })
            .await
            .map_err(|_| EngineError::SessionExpired(key.clone()))?;

        rx.await
            .map_err(|_| EngineError::SessionExpired(key.clone()))?
    }

    /// Returns the current status of a live session.
    pub async fn status(&self, key: &SessionKey) -> Option<StatusView> {
        self.inner
            .store
            .get(key)
            .await
            .filter(Session::is_live)
            .map(|s| s.status_view())
    }

    /// Returns the status of every live session.
    pub async fn list(&self) -> Vec<StatusView> {
        self.inner
            .store
            .list()
            .await
            .iter()
            .filter(|s| s.is_live())
            .map(Session::status_view)
            .collect()
    }

    /// Number of sessions with a running worker.
    pub fn live_sessions(&self) -> usize {
        self.inner.workers.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Terminates every live session so that no artifact outlives the daemon.
    pub async fn shutdown(&self) {
        let handles: Vec<(SessionKey, WorkerHandle)> = match self.inner.workers.lock() {
            Ok(mut workers) => workers.drain().collect(),
            Err(_) => Vec::new(),
        };
        if handles.is_empty() {
            return;
        }
        info!(sessions = handles.len(), "Terminating live sessions");

        let mut pending = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let (tx, rx) = oneshot::channel();
            let envelope = Envelope {
                event: Event::Shutdown,
                reply: Some(tx),
            };
            if handle.events.send(envelope).await.is_ok() {
                pending.push((key, rx));
            }
        }
        for (key, rx) in pending {
            if rx.await.is_err() {
                warn!(key = %key, "Worker exited without confirming shutdown");
            }
        }
    }

    fn take_worker(&self, key: &SessionKey) -> Option<WorkerHandle> {
        self.inner.workers.lock().ok()?.remove(key)
    }
}

// ============================================================================
// Worker
// ============================================================================

/// What to do after an event.
enum Step {
    Continue(Result<Outcome, EngineError>),
    Terminate(TerminationReason, Result<Outcome, EngineError>),
}

struct Worker {
    key: SessionKey,
    generation: u64,
    store: StoreHandle,
    delivery: DeliveryService,
    settings: SupervisorSettings,
    workers: WorkerMap,
    events: mpsc::Receiver<Envelope>,
}

impl Worker {
    async fn run(mut self) {
        debug!(key = %self.key, generation = self.generation, "Session worker started");

        loop {
            let envelope = tokio::select! {
                received = self.events.recv() => received,
                _ = tokio::time::sleep(self.settings.session_timeout) => {
                    info!(key = %self.key, "Session timed out");
                    self.finish(TerminationReason::TimedOut, None).await;
                    return;
                }
            };

            let Some(Envelope { event, reply }) = envelope else {
                // every sender is gone, nobody can reach this session again
                self.finish(TerminationReason::Shutdown, None).await;
                return;
            };

            match self.handle(event).await {
                Step::Continue(result) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Step::Terminate(reason, result) => {
                    self.finish(reason, reply.map(|r| (r, result))).await;
                    return;
                }
            }
        }
    }

    async fn handle(&mut self, event: Event) -> Step {
        match event {
            Event::Action(Action::Commit) => self.commit().await,
            Event::Action(Action::Cancel) => Step::Terminate(
                TerminationReason::Cancelled,
                Ok(Outcome::Terminated(TerminationReason::Cancelled)),
            ),
            Event::Action(action) => Step::Continue(self.apply(action).await),
            Event::Replaced => Step::Terminate(
                TerminationReason::Replaced,
                Ok(Outcome::Terminated(TerminationReason::Replaced)),
            ),
            Event::Shutdown => Step::Terminate(
                TerminationReason::Shutdown,
                Ok(Outcome::Terminated(TerminationReason::Shutdown)),
            ),
        }
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.delivery.transport()
    }

    async fn apply(&self, action: Action) -> Result<Outcome, EngineError> {
        let session = self
            .store
            .update(&self.key, move |s| s.apply_directive(&action, &Local::now()))
            .await?;

        let status = session.status_view();
        self.transport().render(&status).await;
        Ok(Outcome::Updated(status))
    }

    /// Renames (unless the current preview is already committed) and delivers.
    async fn commit(&self) -> Step {
        let session = match self.store.update(&self.key, Session::begin_commit).await {
            Ok(session) => session,
            Err(e) => return Step::Continue(Err(e.into())),
        };

        let session = if session.needs_rename() {
            match self.rename(session).await {
                Ok(session) => session,
                Err(step) => return step,
            }
        } else {
            debug!(key = %self.key, "Preview already committed, re-delivering");
            session
        };

        // the preview, not the on-disk name, which may carry a collision suffix
        let name = session
            .committed_name
            .clone()
            .unwrap_or_else(|| session.artifact_name());
        match self
            .delivery
            .deliver(&self.key, &session.artifact_path, &name)
            .await
        {
            Ok(_) => Step::Terminate(TerminationReason::Delivered, Ok(Outcome::Delivered { name })),
            Err(failure) => self.delivery_failed(failure.attempts, failure.error).await,
        }
    }

    /// Runs the rename engine. On failure returns the step to take.
    async fn rename(&self, session: Session) -> Result<Session, Step> {
        let src = session.artifact_path.clone();
        let dest = session.candidate_path();

        match rename::commit(&src, &dest).await {
            Ok(new_path) => {
                if new_path != src {
                    safe_remove(&src).await;
                }
                self.store
                    .update(&self.key, move |s| {
                        s.record_rename(new_path);
                        Ok(())
                    })
                    .await
                    .map_err(|e| Step::Continue(Err(e.into())))
            }
            Err(e) if e.is_terminal() => {
                error!(key = %self.key, error = %e, "Rename failed permanently");
                Err(Step::Terminate(
                    TerminationReason::IoFailure,
                    Err(EngineError::TerminalIo(e.to_string())),
                ))
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Rename failed, session stays open");
                self.return_to_collecting().await;
                Err(Step::Continue(Err(EngineError::TransientIo(e.to_string()))))
            }
        }
    }

    async fn delivery_failed(&self, attempts: u32, error: TransportError) -> Step {
        let updated = self
            .store
            .update(&self.key, |s| {
                s.record_delivery_failure();
                s.end_commit();
                Ok(())
            })
            .await;
        let session = match updated {
            Ok(session) => session,
            Err(e) => return Step::Continue(Err(e.into())),
        };

        let rounds_left = self
            .settings
            .max_delivery_rounds
            .saturating_sub(session.failed_deliveries);

        self.transport()
            .notify(
                &self.key,
                Notice::DeliveryFailed {
                    message: error.to_string(),
                    attempts,
                    rounds_left,
                },
            )
            .await;

        if rounds_left == 0 {
            warn!(key = %self.key, rounds = session.failed_deliveries, "Delivery rounds exhausted");
            return Step::Terminate(
                TerminationReason::DeliveryExhausted,
                Err(EngineError::Transport(error)),
            );
        }

        let status = session.status_view();
        self.transport().render(&status).await;
        Step::Continue(Ok(Outcome::DeliveryFailed {
            status,
            attempts,
            rounds_left,
        }))
    }

    async fn return_to_collecting(&self) {
        match self
            .store
            .update(&self.key, |s| {
                s.end_commit();
                Ok(())
            })
            .await
        {
            Ok(session) => self.transport().render(&session.status_view()).await,
            Err(e) => warn!(key = %self.key, error = %e, "Could not reopen session"),
        }
    }

    /// Terminal sequence: close the queue, release the artifact, evict the
    /// record, notify, reply, then turn away anything still queued.
    async fn finish(
        &mut self,
        reason: TerminationReason,
        reply: Option<(Reply, Result<Outcome, EngineError>)>,
    ) {
        self.events.close();
        self.unregister();

        let marked = self
            .store
            .update(&self.key, |s| {
                s.mark_terminated();
                Ok(())
            })
            .await;
        match marked {
            Ok(session) => {
                safe_remove(&session.artifact_path).await;
                if let Some(dir) = session.artifact_path.parent() {
                    remove_dir_if_empty(dir).await;
                }
            }
            Err(e) => warn!(key = %self.key, error = %e, "No record to clean up"),
        }
        self.store.remove(&self.key).await;

        info!(key = %self.key, reason = ?reason, "Session terminated");
        self.transport()
            .notify(&self.key, Notice::Terminated(reason))
            .await;

        if let Some((reply, result)) = reply {
            let _ = reply.send(result);
        }

        while let Ok(Envelope { reply, .. }) = self.events.try_recv() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(EngineError::SessionExpired(self.key.clone())));
            }
        }
    }

    /// Removes this worker from the map unless a successor already took the key.
    fn unregister(&self) {
        if let Ok(mut workers) = self.workers.lock() {
            if workers
                .get(&self.key)
                .is_some_and(|w| w.generation == self.generation)
            {
                workers.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_actions() {
        let key = SessionKey::new("k");
        assert_eq!(
            EngineError::SessionExpired(key).next_action(),
            NextAction::Reupload
        );
        assert_eq!(
            EngineError::TransientIo("x".into()).next_action(),
            NextAction::Retry
        );
        assert_eq!(
            EngineError::TerminalIo("disk full".into()).next_action(),
            NextAction::ContactSupport
        );
        assert_eq!(
            EngineError::Validation(DomainError::invalid_input("prefix", "bad")).next_action(),
            NextAction::FixInput
        );
        assert_eq!(
            EngineError::Transport(TransportError::Rejected("no".into())).next_action(),
            NextAction::ContactSupport
        );
        assert_eq!(
            EngineError::Transport(TransportError::Unavailable("no".into())).next_action(),
            NextAction::Retry
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let key = SessionKey::new("k");
        assert_eq!(
            EngineError::from(StoreError::SessionExpired(key.clone())),
            EngineError::SessionExpired(key)
        );
        assert!(matches!(
            EngineError::from(StoreError::StoreFull { max: 1 }),
            EngineError::Unavailable(_)
        ));
        assert!(matches!(
            EngineError::from(StoreError::Rejected(DomainError::invalid_input("a", "b"))),
            EngineError::Validation(_)
        ));
    }
}
