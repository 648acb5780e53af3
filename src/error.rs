//! Error types for the access-control core

use crate::sync::SyncStatus;
use thiserror::Error;

/// Result type alias for access-control operations
pub type Result<T> = std::result::Result<T, AccessError>;

/// Errors surfaced by resolution, caching, and reconciliation.
///
/// A failed authority-source query is never converted into a lower role;
/// callers receive `AuthorityUnavailable` and must treat the role as
/// undetermined (equivalent to no role for gating purposes).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// A source query failed or timed out. Recoverable; reads are retried
    /// a bounded number of times before this surfaces to the caller.
    #[error("authority source '{authority}' unavailable: {reason}")]
    AuthorityUnavailable {
        authority: &'static str,
        reason: String,
    },

    /// The source explicitly denied access to the caller. Distinct from
    /// "no matching row"; never retried.
    #[error("authority source '{authority}' denied access: {reason}")]
    Unauthorized {
        authority: &'static str,
        reason: String,
    },

    /// The secondary-store write failed after a successful resolution.
    #[error("secondary role store write failed: {reason}")]
    SyncWriteFailure { reason: String },

    /// A sync status transition outside the declared state machine.
    #[error("invalid sync transition {from} -> {to}")]
    InvalidTransition { from: SyncStatus, to: SyncStatus },

    /// Generic internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<anyhow::Error> for AccessError {
    fn from(err: anyhow::Error) -> Self {
        AccessError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AccessError::AuthorityUnavailable {
            authority: "user_roles",
            reason: "timed out".to_string(),
        };
        assert!(err.to_string().contains("user_roles"));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = AccessError::InvalidTransition {
            from: SyncStatus::Idle,
            to: SyncStatus::Completed,
        };
        assert!(err.to_string().contains("idle"));
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = AccessError::SyncWriteFailure {
            reason: "connection reset".to_string(),
        };
        let err2 = AccessError::SyncWriteFailure {
            reason: "connection reset".to_string(),
        };
        assert_eq!(err1, err2);
    }

    #[test]
    fn test_from_anyhow() {
        let err: AccessError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AccessError::Internal { .. }));
    }
}
