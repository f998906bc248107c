//! Error types for stage handlers.

use thiserror::Error;

/// Errors that end a stage run. Each one moves the session to `failed`.
#[derive(Debug, Error)]
pub enum StageError {
    /// The external process could not be started or exited non-zero.
    #[error("{program} failed: {reason}")]
    ProcessFailure {
        program: String,
        reason: String,
        /// Tail of the captured process output.
        diagnostics: Option<String>,
    },

    /// The expected artifact did not appear before the deadline.
    #[error("timed out after {timeout_secs} seconds waiting for {artifact}")]
    ArtifactTimeout {
        artifact: String,
        timeout_secs: u64,
        detail: Option<String>,
    },

    /// The artifact exists but cannot be parsed.
    #[error("{artifact} is malformed: {reason}")]
    ArtifactMalformed { artifact: String, reason: String },

    /// A file the stage needs as input was never written.
    #[error("required input {artifact} is missing")]
    MissingInput { artifact: String },

    /// I/O error while supervising the stage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn malformed(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ArtifactMalformed {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Human-readable message recorded on the failed session.
    pub fn status_message(&self) -> String {
        match self {
            StageError::ProcessFailure {
                diagnostics: Some(diag),
                ..
            }
            | StageError::ArtifactTimeout {
                detail: Some(diag),
                ..
            } => format!("{}\n{}", self, diag),
            _ => self.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::ProcessFailure { .. } => "process_failure",
            StageError::ArtifactTimeout { .. } => "artifact_timeout",
            StageError::ArtifactMalformed { .. } => "artifact_malformed",
            StageError::MissingInput { .. } => "missing_input",
            StageError::Io(_) => "io",
        }
    }
}
