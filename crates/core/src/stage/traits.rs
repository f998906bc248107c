//! Trait definitions for stage handlers.

use std::time::Duration;

use async_trait::async_trait;

use super::error::StageError;
use super::types::{Stage, StageJob, StageOutcome};

/// Supervises the work of one pipeline stage for a claimed session.
///
/// The poller records the returned outcome or error on the session; a
/// handler never writes the session status itself.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage this handler runs.
    fn stage(&self) -> Stage;

    /// Upper bound on one run, if the handler enforces one.
    ///
    /// Claims older than this (plus a grace period) are treated as orphaned.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the stage to completion or failure.
    async fn run(&self, job: &StageJob) -> Result<StageOutcome, StageError>;
}
