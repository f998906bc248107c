//! Error types for client-driven session requests.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::{SessionError, SessionStatus};

/// Errors from uploads and stage requests.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The session is not in a status that accepts this request.
    #[error("Session {session_id} is {status}, expected {expected}")]
    InvalidState {
        session_id: String,
        status: SessionStatus,
        expected: String,
    },

    /// The request body is unusable.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A client-supplied path escapes the working directory.
    #[error("Path escapes the session directory: {path}")]
    PathTraversal { path: String },

    /// The path belongs to a file the pipeline writes.
    #[error("Path is reserved for pipeline output: {}", path.display())]
    ReservedPath { path: PathBuf },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    pub fn invalid_state(
        session_id: impl Into<String>,
        status: SessionStatus,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            session_id: session_id.into(),
            status,
            expected: expected.into(),
        }
    }
}
