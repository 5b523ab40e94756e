//! Domain-specific error types following panic-free policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// User-supplied directive text failed validation
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// Timestamp format string could not be parsed
    #[error("Invalid timestamp format '{format}': {reason}")]
    InvalidTimestampFormat { format: String, reason: String },

    /// Unknown keyword for an enumerated option (case mode, timestamp preset)
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// The session is not accepting directives in its current state
    #[error("Session is {state}, directives are not accepted")]
    NotCollecting { state: String },
}

impl DomainError {
    /// Creates an invalid input error for the given field.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// What the user should do about this error.
    pub fn next_action(&self) -> NextAction {
        match self {
            Self::NotCollecting { .. } => NextAction::Retry,
            _ => NextAction::FixInput,
        }
    }
}

/// Concrete next step attached to every user-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Try the same action again.
    Retry,
    /// Correct the input and resend.
    FixInput,
    /// Start over with a new upload.
    Reupload,
    /// The problem is on the host side.
    ContactSupport,
}

impl NextAction {
    /// Returns the hint shown to the user.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Retry => "try again",
            Self::FixInput => "correct the input and try again",
            Self::Reupload => "upload the file again",
            Self::ContactSupport => "contact support if this keeps happening",
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hint())
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = DomainError::invalid_input("prefix", "must not be empty");
        assert_eq!(err.to_string(), "Invalid prefix: must not be empty");
    }

    #[test]
    fn test_invalid_field_value_display() {
        let err = DomainError::InvalidFieldValue {
            field: "case".to_string(),
            value: "shouty".to_string(),
            expected: "upper, lower, title or none".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid case: shouty (expected upper, lower, title or none)"
        );
    }

    #[test]
    fn test_next_action() {
        assert_eq!(
            DomainError::invalid_input("prefix", "too long").next_action(),
            NextAction::FixInput
        );
        let err = DomainError::NotCollecting {
            state: "committing".to_string(),
        };
        assert_eq!(err.next_action(), NextAction::Retry);
    }

    #[test]
    fn test_not_collecting_display() {
        let err = DomainError::NotCollecting {
            state: "committing".to_string(),
        };
        assert!(err.to_string().contains("committing"));
    }
}
