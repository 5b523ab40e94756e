//! Delivery service: hands a committed artifact to the transport with bounded retry.
//!
//! The transport is injected as `Arc<dyn Transport>`, so tests and other
//! front ends can substitute their own.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use renamer_core::{SessionKey, StatusView, TerminationReason};

// ============================================================================
// Transport
// ============================================================================

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Nobody is connected to receive the file.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The transport did not respond in time.
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    /// Local I/O failed while handing the file over.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The transport refused the payload. Retrying will not help.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Returns true for network-style failures worth retrying.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Asynchronous notices pushed to the user outside a request/response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A delivery round failed. The renamed file is kept for another try.
    DeliveryFailed {
        message: String,
        attempts: u32,
        rounds_left: u32,
    },
    /// The session ended.
    Terminated(TerminationReason),
}

/// The front end that receives files and displays session state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hands the artifact at `artifact` to the user under `display_name`.
    async fn deliver(
        &self,
        key: &SessionKey,
        artifact: &Path,
        display_name: &str,
    ) -> Result<(), TransportError>;

    /// Shows the current preview and directive summary.
    ///
    /// Failures are the transport's to log; they never reach the session.
    async fn render(&self, status: &StatusView);

    /// Pushes a notice to the user. Failures are logged, never returned.
    async fn notify(&self, key: &SessionKey, notice: Notice);
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded exponential backoff for delivery.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
    /// Decides whether an error is worth another attempt.
    pub retryable: fn(&TransportError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            multiplier: 2,
            retryable: TransportError::is_transient,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("multiplier", &self.multiplier)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

// ============================================================================
// Delivery Service
// ============================================================================

/// A delivery round that ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery failed after {attempts} attempt(s): {error}")]
pub struct DeliveryFailure {
    pub attempts: u32,
    pub error: TransportError,
}

/// Delivers artifacts through a transport under a retry policy.
#[derive(Clone)]
pub struct DeliveryService {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl DeliveryService {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Delivers the artifact, retrying transient failures.
    ///
    /// Returns the number of attempts used. Never touches the artifact itself.
    pub async fn deliver(
        &self,
        key: &SessionKey,
        artifact: &Path,
        display_name: &str,
    ) -> Result<u32, DeliveryFailure> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.deliver(key, artifact, display_name).await {
                Ok(()) => {
                    info!(key = %key, name = display_name, attempt, "Artifact delivered");
                    return Ok(attempt);
                }
                Err(e) if attempt < max_attempts && (self.policy.retryable)(&e) => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        key = %key,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(key = %key, attempts = attempt, error = %e, "Delivery failed");
                    return Err(DeliveryFailure {
                        attempts: attempt,
                        error: e,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    /// Transport that replays scripted results for `deliver`.
    struct ScriptedTransport {
        results: Mutex<VecDeque<Result<(), TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(results: Vec<Result<(), TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
            })
        }

        async fn calls(&self) -> u32 {
            *self.calls.lock().await
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(
            &self,
            _key: &SessionKey,
            _artifact: &Path,
            _display_name: &str,
        ) -> Result<(), TransportError> {
            *self.calls.lock().await += 1;
            self.results.lock().await.pop_front().unwrap_or(Ok(()))
        }

        async fn render(&self, _status: &StatusView) {}

        async fn notify(&self, _key: &SessionKey, _notice: Notice) {}
    }

    fn unavailable() -> Result<(), TransportError> {
        Err(TransportError::Unavailable("offline".into()))
    }

    fn key() -> SessionKey {
        SessionKey::new("alice")
    }

    fn artifact() -> PathBuf {
        PathBuf::from("/tmp/a.pdf")
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Unavailable("x".into()).is_transient());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(TransportError::Io("x".into()).is_transient());
        assert!(!TransportError::Rejected("too big".into()).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_backoff() {
        let transport = ScriptedTransport::new(vec![unavailable(), unavailable(), Ok(())]);
        let service = DeliveryService::new(transport.clone(), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        let attempts = service.deliver(&key(), &artifact(), "a.pdf").await.unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(transport.calls().await, 3);
        // 2s after the first failure, 4s after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(7), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts() {
        let transport =
            ScriptedTransport::new(vec![unavailable(), unavailable(), unavailable(), Ok(())]);
        let service = DeliveryService::new(transport.clone(), RetryPolicy::default());

        let failure = service.deliver(&key(), &artifact(), "a.pdf").await.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.error, TransportError::Unavailable(_)));
        assert_eq!(transport.calls().await, 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Rejected(
            "payload too large".into(),
        ))]);
        let service = DeliveryService::new(transport.clone(), RetryPolicy::default());

        let failure = service.deliver(&key(), &artifact(), "a.pdf").await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(transport.calls().await, 1);
    }

    #[tokio::test]
    async fn test_custom_retryable_predicate() {
        fn never(_: &TransportError) -> bool {
            false
        }
        let transport = ScriptedTransport::new(vec![unavailable(), Ok(())]);
        let policy = RetryPolicy {
            retryable: never,
            ..RetryPolicy::default()
        };
        let service = DeliveryService::new(transport.clone(), policy);

        assert!(service.deliver(&key(), &artifact(), "a.pdf").await.is_err());
        assert_eq!(transport.calls().await, 1);
    }
}
