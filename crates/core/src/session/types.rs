//! Core session data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a session in the conversion pipeline.
///
/// ```text
/// Created -> Uploaded -> Preprocessing -> Analyzed
///                              |             |  \
///                              v             |   Deface -> Defacing -> Defaced
///                            Failed          |                 |          |
///                                            v                 v          v
///                                        Finalized  <------- Failed ------+
///                                            |
///                                            v
///                                         Bidsing -> Finished
///                                            |
///                                            v
///                                          Failed
/// ```
///
/// `Finished` and `Failed` are terminal. `Failed` is reachable from every
/// in-progress status (`Preprocessing`, `Defacing`, `Bidsing`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session exists, files are being uploaded.
    Created,
    /// Upload finished, waiting for preprocessing.
    Uploaded,
    /// Preprocessing handler is running.
    Preprocessing,
    /// Analysis result is available for review.
    Analyzed,
    /// Defacing requested, waiting to be claimed.
    Deface,
    /// Deface handler is running.
    Defacing,
    /// Defacing finished (per-image results in the ledgers).
    Defaced,
    /// Finalize payload submitted, waiting to be claimed.
    Finalized,
    /// Finalize handler is generating the BIDS tree.
    Bidsing,
    /// BIDS tree is ready for download (terminal).
    Finished,
    /// A stage failed (terminal).
    Failed,
}

impl SessionStatus {
    /// Every member of the enumeration, in pipeline order.
    pub const ALL: [SessionStatus; 11] = [
        SessionStatus::Created,
        SessionStatus::Uploaded,
        SessionStatus::Preprocessing,
        SessionStatus::Analyzed,
        SessionStatus::Deface,
        SessionStatus::Defacing,
        SessionStatus::Defaced,
        SessionStatus::Finalized,
        SessionStatus::Bidsing,
        SessionStatus::Finished,
        SessionStatus::Failed,
    ];

    /// Returns the status name as stored and exposed to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Uploaded => "uploaded",
            SessionStatus::Preprocessing => "preprocessing",
            SessionStatus::Analyzed => "analyzed",
            SessionStatus::Deface => "deface",
            SessionStatus::Defacing => "defacing",
            SessionStatus::Defaced => "defaced",
            SessionStatus::Finalized => "finalized",
            SessionStatus::Bidsing => "bidsing",
            SessionStatus::Finished => "finished",
            SessionStatus::Failed => "failed",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Finished | SessionStatus::Failed)
    }

    /// Returns true if a stage handler owns the session in this status.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SessionStatus::Preprocessing | SessionStatus::Defacing | SessionStatus::Bidsing
        )
    }

    /// Returns true if `next` is a legal edge from this status.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Created, Uploaded)
                | (Uploaded, Preprocessing)
                | (Preprocessing, Analyzed)
                | (Preprocessing, Failed)
                | (Analyzed, Deface)
                | (Deface, Defacing)
                | (Defacing, Defaced)
                | (Defacing, Failed)
                | (Analyzed, Finalized)
                | (Defaced, Finalized)
                | (Finalized, Bidsing)
                | (Bidsing, Finished)
                | (Bidsing, Failed)
        )
    }

    /// Position along the pipeline, used for artifact visibility checks.
    ///
    /// `Failed` has no position since it can be entered from any stage.
    pub fn progress_rank(&self) -> Option<u8> {
        match self {
            SessionStatus::Created => Some(0),
            SessionStatus::Uploaded => Some(1),
            SessionStatus::Preprocessing => Some(2),
            SessionStatus::Analyzed => Some(3),
            SessionStatus::Deface => Some(4),
            SessionStatus::Defacing => Some(5),
            SessionStatus::Defaced => Some(6),
            SessionStatus::Finalized => Some(7),
            SessionStatus::Bidsing => Some(8),
            SessionStatus::Finished => Some(9),
            SessionStatus::Failed => None,
        }
    }

    /// Returns true if this status is at or past `other` along the pipeline.
    pub fn has_reached(&self, other: SessionStatus) -> bool {
        match (self.progress_rank(), other.progress_rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a status name outside the enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown session status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A session: one user's upload-to-BIDS unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Unique identifier (UUID).
    pub id: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the client reported the upload as complete.
    #[serde(default)]
    pub upload_finished_at: Option<DateTime<Utc>>,

    /// When preprocessing was claimed by a worker.
    #[serde(default)]
    pub preprocess_started_at: Option<DateTime<Utc>>,

    /// When preprocessing resolved (success or failure).
    #[serde(default)]
    pub preprocess_finished_at: Option<DateTime<Utc>>,

    /// Current status.
    pub status: SessionStatus,

    /// Diagnostic or progress message.
    #[serde(default)]
    pub status_msg: Option<String>,

    /// Last write to this record. Clients use it to spot stale in-progress sessions.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session in `Created` status with default timestamps.
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            upload_finished_at: None,
            preprocess_started_at: None,
            preprocess_finished_at: None,
            status: SessionStatus::Created,
            status_msg: None,
            updated_at: now,
        }
    }
}

/// Partial update applied by [`SessionStore::update`](super::SessionStore::update).
///
/// Fields left as `None` are not modified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    /// `Some(None)` clears the message.
    pub status_msg: Option<Option<String>>,
    pub upload_finished_at: Option<DateTime<Utc>>,
    pub preprocess_started_at: Option<DateTime<Utc>>,
    pub preprocess_finished_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    /// Patch that moves the session to `status`.
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Patch that moves the session to `Failed` with a diagnostic.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::status(SessionStatus::Failed).with_message(message)
    }

    /// Set the status message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_msg = Some(Some(message.into()));
        self
    }

    /// Clear the status message.
    pub fn clear_message(mut self) -> Self {
        self.status_msg = Some(None);
        self
    }

    pub fn with_upload_finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.upload_finished_at = Some(at);
        self
    }

    pub fn with_preprocess_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.preprocess_started_at = Some(at);
        self
    }

    pub fn with_preprocess_finished_at(mut self, at: DateTime<Utc>) -> Self {
        self.preprocess_finished_at = Some(at);
        self
    }

    /// Apply this patch to a session record in place.
    pub fn apply(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(ref msg) = self.status_msg {
            session.status_msg = msg.clone();
        }
        if let Some(at) = self.upload_finished_at {
            session.upload_finished_at = Some(at);
        }
        if let Some(at) = self.preprocess_started_at {
            session.preprocess_started_at = Some(at);
        }
        if let Some(at) = self.preprocess_finished_at {
            session.preprocess_finished_at = Some(at);
        }
        session.updated_at = now;
    }
}
