//! Session storage trait and error type.

use std::fmt;

use super::{Session, SessionPatch, SessionStatus};

/// Error type for session store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Session not found.
    NotFound(String),
    /// Compare-and-set lost: the session is no longer in the expected status.
    ClaimConflict {
        session_id: String,
        expected: SessionStatus,
        actual: SessionStatus,
    },
    /// The requested status change is not an edge of the state machine.
    InvalidTransition {
        session_id: String,
        from: SessionStatus,
        to: SessionStatus,
    },
    /// Database error.
    Database(String),
}

impl SessionError {
    /// Whether this is a lost claim race (benign, another worker advanced the session).
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, SessionError::ClaimConflict { .. })
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "Session not found: {}", id),
            SessionError::ClaimConflict {
                session_id,
                expected,
                actual,
            } => write!(
                f,
                "Session {} was expected to be {} but is {}",
                session_id, expected, actual
            ),
            SessionError::InvalidTransition {
                session_id,
                from,
                to,
            } => write!(
                f,
                "Cannot move session {} from {} to {}",
                session_id, from, to
            ),
            SessionError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Trait for session storage backends.
///
/// `update` is the only concurrency primitive the rest of the system relies
/// on: it must be atomic across every worker sharing the backend.
pub trait SessionStore: Send + Sync {
    /// Create a new session in `Created` status.
    fn create(&self) -> Result<Session, SessionError>;

    /// Get a session by ID.
    fn get(&self, id: &str) -> Result<Session, SessionError>;

    /// Apply `patch` only if the session's current status equals `expected`.
    ///
    /// Returns the updated session. Fails with `ClaimConflict` if the status
    /// differs, `NotFound` if the id is absent, and `InvalidTransition` if
    /// the patch's status is not reachable from `expected`.
    fn update(
        &self,
        id: &str,
        patch: SessionPatch,
        expected: SessionStatus,
    ) -> Result<Session, SessionError>;

    /// List sessions with the given status, oldest first.
    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, SessionError>;

    /// Count sessions with the given status.
    fn count_by_status(&self, status: SessionStatus) -> Result<i64, SessionError>;

    /// Permanently delete a session record.
    /// Returns the deleted session if found.
    fn delete(&self, id: &str) -> Result<Session, SessionError>;

    /// Delete a session only if its current status equals `expected`.
    ///
    /// Fails with `ClaimConflict` if the status differs and `NotFound` if
    /// the id is absent.
    fn delete_in_status(&self, id: &str, expected: SessionStatus) -> Result<Session, SessionError>;

    /// Flush pending writes before the process exits.
    fn shutdown(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Validate a patch against the expected status before it reaches the backend.
pub(crate) fn check_transition(
    id: &str,
    patch: &SessionPatch,
    expected: SessionStatus,
) -> Result<(), SessionError> {
    match patch.status {
        // No self edges exist, so re-asserting the current status is rejected too.
        Some(next) if !expected.can_transition_to(next) => Err(SessionError::InvalidTransition {
            session_id: id.to_string(),
            from: expected,
            to: next,
        }),
        _ => Ok(()),
    }
}
