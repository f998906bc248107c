//! Error types for artifact access.

use thiserror::Error;

use crate::session::{SessionError, SessionStatus};

/// Errors that can occur while reading session artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Requested path escapes the working directory.
    #[error("path escapes the session working directory: {path}")]
    PathTraversal { path: String },

    /// Artifact exists only once the session has progressed further.
    #[error("{path} is not available while session is {status} (requires {required})")]
    NotReady {
        path: String,
        status: SessionStatus,
        required: SessionStatus,
    },

    /// No such file in the working directory.
    #[error("artifact not found: {path}")]
    NotFound { path: String },

    /// Artifact is present but cannot be parsed.
    #[error("artifact {path} is malformed: {reason}")]
    Malformed { path: String, reason: String },

    /// Session lookup failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// I/O error while reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }
}
