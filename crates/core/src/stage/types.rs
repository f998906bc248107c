//! Stage identities and handler job/outcome types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// A phase of the pipeline run by an external process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    Deface,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Preprocess, Stage::Deface, Stage::Finalize];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Deface => "deface",
            Stage::Finalize => "finalize",
        }
    }

    /// Status that makes a session eligible for this stage.
    pub fn trigger_status(&self) -> SessionStatus {
        match self {
            Stage::Preprocess => SessionStatus::Uploaded,
            Stage::Deface => SessionStatus::Deface,
            Stage::Finalize => SessionStatus::Finalized,
        }
    }

    /// Status held while a worker runs this stage.
    pub fn in_progress_status(&self) -> SessionStatus {
        match self {
            Stage::Preprocess => SessionStatus::Preprocessing,
            Stage::Deface => SessionStatus::Defacing,
            Stage::Finalize => SessionStatus::Bidsing,
        }
    }

    /// Status recorded when the handler succeeds.
    pub fn success_status(&self) -> SessionStatus {
        match self {
            Stage::Preprocess => SessionStatus::Analyzed,
            Stage::Deface => SessionStatus::Defaced,
            Stage::Finalize => SessionStatus::Finished,
        }
    }

    /// Captured stdout of the stage process.
    pub fn log_file(&self) -> String {
        format!("{}.log", self.name())
    }

    /// Captured stderr of the stage process.
    pub fn err_file(&self) -> String {
        format!("{}.err", self.name())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work handed to a stage handler after a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    pub session_id: String,
    pub workdir: PathBuf,
}

/// Result of a successful stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Informational message stored on the session.
    pub message: Option<String>,
}

impl StageOutcome {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}
