//! Types for the stage poller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionError;
use crate::stage::Stage;

/// Errors that end a poll cycle early. The next cycle retries.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("session store error: {0}")]
    Store(#[from] SessionError),
}

/// A stage handler currently running in this process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveStage {
    pub session_id: String,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
}

/// Current status of the poller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollerStatus {
    /// Whether the stage loops are running.
    pub running: bool,
    /// Stage handlers running in this process.
    pub active_handlers: usize,
    /// Configured handler limit (0 = unlimited).
    pub max_concurrent_handlers: usize,
    /// Session counts keyed by status name, across all workers.
    pub sessions_by_status: BTreeMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_stage_serialization() {
        let active = ActiveStage {
            session_id: "s-1".to_string(),
            stage: Stage::Deface,
            started_at: Utc::now(),
        };
        let json = serde_json::to_value(&active).unwrap();
        assert_eq!(json["stage"], "deface");
        assert_eq!(json["session_id"], "s-1");
    }

    #[test]
    fn test_status_default() {
        let status = PollerStatus::default();
        assert!(!status.running);
        assert_eq!(status.active_handlers, 0);
        assert!(status.sessions_by_status.is_empty());
    }
}
