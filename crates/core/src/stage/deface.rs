//! Deface stage: strip facial features from the requested anatomical images.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::config::StageCommandConfig;
use super::error::StageError;
use super::process::{wait_for_input, Probe, StageProcess};
use super::traits::StageHandler;
use super::types::{Stage, StageJob, StageOutcome};
use crate::artifact::{names, read_to_string_or_empty, DefaceRequest, LedgerMerge};

/// Runs the defacing program and waits until every requested image is
/// listed in the success or failure ledger.
pub struct DefaceHandler {
    config: StageCommandConfig,
}

impl DefaceHandler {
    pub fn new(config: StageCommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageHandler for DefaceHandler {
    fn stage(&self) -> Stage {
        Stage::Deface
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.timeout_secs))
    }

    async fn run(&self, job: &StageJob) -> Result<StageOutcome, StageError> {
        let dir = job.workdir.as_path();
        let bytes = wait_for_input(dir, names::DEFACE_REQUEST, &self.config).await?;
        let request: DefaceRequest = serde_json::from_slice(&bytes)
            .map_err(|e| StageError::malformed(names::DEFACE_REQUEST, e.to_string()))?;

        // Ledgers from an earlier attempt must not count toward this one
        for ledger in [names::DEFACE_SUCCESS_LEDGER, names::DEFACE_FAILURE_LEDGER] {
            match tokio::fs::remove_file(dir.join(ledger)).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        info!(
            "Defacing {} images for session {} with {:?}",
            request.images.len(),
            job.session_id,
            request.method
        );

        let images = &request.images;
        let merge = StageProcess::new(Stage::Deface, &self.config)
            .run_until_ready(job, names::DEFACE_SUCCESS_LEDGER, || probe(dir, images))
            .await?;

        if !merge.duplicates.is_empty() {
            warn!(
                "Session {}: duplicate deface ledger entries ignored: {:?}",
                job.session_id, merge.duplicates
            );
        }
        if !merge.unexpected.is_empty() {
            warn!(
                "Session {}: unrequested deface ledger entries ignored: {:?}",
                job.session_id, merge.unexpected
            );
        }
        if !merge.conflicting.is_empty() {
            warn!(
                "Session {}: images in both deface ledgers treated as failed: {:?}",
                job.session_id, merge.conflicting
            );
        }

        Ok(StageOutcome::with_message(merge.summary()))
    }
}

async fn probe(dir: &Path, images: &[String]) -> Result<Probe<LedgerMerge>, StageError> {
    let success = read_to_string_or_empty(&dir.join(names::DEFACE_SUCCESS_LEDGER)).await?;
    let failure = read_to_string_or_empty(&dir.join(names::DEFACE_FAILURE_LEDGER)).await?;

    let merge = LedgerMerge::merge(images, &success, &failure);
    if merge.is_complete() {
        Ok(Probe::Ready(merge))
    } else {
        Ok(Probe::Pending(Some(format!(
            "images not defaced: {}",
            merge.missing().join(", ")
        ))))
    }
}
