//! Session domain entities and value objects.

use crate::directive::{Action, Directives, SummaryEntry};
use crate::error::{DomainError, DomainResult};
use crate::pipeline::preview;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Key identifying a user's session (one chat, one CLI user).
///
/// At most one live session exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a form of the key usable as a single directory name.
    #[must_use]
    pub fn dir_name(&self) -> String {
        crate::pipeline::sanitize(&self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque handle to the transport's editable status surface.
///
/// The core never interprets it, only hands it back with each status update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UiRef(String);

impl UiRef {
    pub fn new(r: impl Into<String>) -> Self {
        Self(r.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting directives (initial state).
    #[default]
    CollectingDirectives,
    /// A rename or delivery is in flight.
    Committing,
    /// Finished. No further events are accepted.
    Terminated,
}

impl SessionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectingDirectives => "collecting",
            Self::Committing => "committing",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The renamed file reached the user.
    Delivered,
    /// The user cancelled.
    Cancelled,
    /// No activity within the inactivity window.
    TimedOut,
    /// A new upload for the same key took over.
    Replaced,
    /// The daemon is stopping.
    Shutdown,
    /// Every delivery round failed.
    DeliveryExhausted,
    /// A filesystem failure that retrying cannot fix.
    IoFailure,
}

impl TerminationReason {
    /// Returns a user-facing description.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Delivered => "file delivered",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed out after inactivity",
            Self::Replaced => "replaced by a new upload",
            Self::Shutdown => "service shutting down",
            Self::DeliveryExhausted => "delivery failed too many times",
            Self::IoFailure => "storage error",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

// ============================================================================
// Session
// ============================================================================

/// One uploaded artifact and the directives being collected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    /// Sanitized display name of the upload.
    pub original_name: String,
    /// Current location of the artifact. Owned by this session.
    pub artifact_path: PathBuf,
    pub directives: Directives,
    pub state: SessionState,
    pub ui_ref: Option<UiRef>,
    /// Delivery rounds that ran out of retries.
    pub failed_deliveries: u32,
    /// Name produced by the last successful rename.
    pub committed_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Creates a session in `CollectingDirectives` with default directives.
    pub fn new(
        key: SessionKey,
        original_name: &str,
        artifact_path: impl Into<PathBuf>,
        ui_ref: Option<UiRef>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            original_name: crate::pipeline::sanitize(original_name),
            artifact_path: artifact_path.into(),
            directives: Directives::default(),
            state: SessionState::CollectingDirectives,
            ui_ref,
            failed_deliveries: 0,
            committed_name: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Returns the candidate filename under the current directives.
    #[must_use]
    pub fn preview(&self) -> String {
        preview(&self.original_name, &self.directives)
    }

    /// Returns where the artifact would live if committed now.
    #[must_use]
    pub fn candidate_path(&self) -> PathBuf {
        let dir = self.artifact_path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(self.preview())
    }

    /// Returns true if a commit must rename before delivering.
    ///
    /// A session whose last rename already produced the current preview only
    /// needs to re-deliver.
    #[must_use]
    pub fn needs_rename(&self) -> bool {
        self.committed_name.as_deref() != Some(self.preview().as_str())
    }

    /// Returns true until the session is terminated.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state != SessionState::Terminated
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn ensure_collecting(&self) -> DomainResult<()> {
        if self.state == SessionState::CollectingDirectives {
            Ok(())
        } else {
            Err(DomainError::NotCollecting {
                state: self.state.to_string(),
            })
        }
    }

    /// Applies a directive action.
    ///
    /// # Errors
    ///
    /// Fails if the session is not collecting directives or the directive
    /// input is invalid. The session is unchanged on error.
    pub fn apply_directive(&mut self, action: &Action, now: &DateTime<Local>) -> DomainResult<()> {
        self.ensure_collecting()?;
        self.directives.apply(action, now)?;
        self.touch();
        debug!(
            key = %self.key,
            action = action.name(),
            preview = %self.preview(),
            "Directive applied"
        );
        Ok(())
    }

    /// Moves `CollectingDirectives` to `Committing`.
    ///
    /// # Errors
    ///
    /// Fails with `NotCollecting` from any other state, which rejects a
    /// second commit while one is in flight.
    pub fn begin_commit(&mut self) -> DomainResult<()> {
        self.ensure_collecting()?;
        self.state = SessionState::Committing;
        self.touch();
        Ok(())
    }

    /// Returns a committing session to `CollectingDirectives`.
    pub fn end_commit(&mut self) {
        if self.state == SessionState::Committing {
            self.state = SessionState::CollectingDirectives;
        }
        self.touch();
    }

    /// Records a successful rename: the artifact now lives at `new_path`.
    ///
    /// `committed_name` keeps the preview that was committed, which can differ
    /// from the file name when a collision suffix was added.
    pub fn record_rename(&mut self, new_path: PathBuf) {
        self.artifact_path = new_path;
        self.committed_name = Some(self.preview());
    }

    /// Returns the artifact's current file name.
    #[must_use]
    pub fn artifact_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map_or_else(|| self.preview(), |n| n.to_string_lossy().into_owned())
    }

    /// Records a delivery round that exhausted its retries and returns the
    /// number of failed rounds so far.
    pub fn record_delivery_failure(&mut self) -> u32 {
        self.failed_deliveries = self.failed_deliveries.saturating_add(1);
        self.failed_deliveries
    }

    pub fn mark_terminated(&mut self) {
        self.state = SessionState::Terminated;
        self.touch();
    }

    /// Builds the status pair (preview plus directive summary) for rendering.
    #[must_use]
    pub fn status_view(&self) -> StatusView {
        StatusView {
            key: self.key.clone(),
            original_name: self.original_name.clone(),
            preview: self.preview(),
            summary: self.directives.summary(),
            state: self.state,
            ui_ref: self.ui_ref.clone(),
        }
    }
}

// ============================================================================
// Status View
// ============================================================================

/// What the transport renders after each state-preserving transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub key: SessionKey,
    pub original_name: String,
    pub preview: String,
    pub summary: Vec<SummaryEntry>,
    pub state: SessionState,
    pub ui_ref: Option<UiRef>,
}
