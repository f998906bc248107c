//! Finalize stage: generate the BIDS dataset from the reviewed mappings.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::config::StageCommandConfig;
use super::error::StageError;
use super::process::{wait_for_input, Probe, StageProcess};
use super::traits::StageHandler;
use super::types::{Stage, StageJob, StageOutcome};
use crate::artifact::{names, FinalizePayload};

/// Runs the BIDS conversion program and waits for a dataset to appear
/// under the `bids` directory.
pub struct FinalizeHandler {
    config: StageCommandConfig,
}

impl FinalizeHandler {
    pub fn new(config: StageCommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageHandler for FinalizeHandler {
    fn stage(&self) -> Stage {
        Stage::Finalize
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.timeout_secs))
    }

    async fn run(&self, job: &StageJob) -> Result<StageOutcome, StageError> {
        let dir = job.workdir.as_path();
        let bytes = wait_for_input(dir, names::FINALIZE_SNAPSHOT, &self.config).await?;
        let payload = FinalizePayload::parse(&bytes)
            .map_err(|reason| StageError::malformed(names::FINALIZE_SNAPSHOT, reason))?;

        info!(
            "Generating BIDS dataset for session {} ({} objects, {} subjects)",
            job.session_id,
            payload.objects.len(),
            payload.subjects.len()
        );

        let dataset = StageProcess::new(Stage::Finalize, &self.config)
            .run_until_ready(job, names::DATASET_DESCRIPTION, || probe(dir))
            .await?;

        Ok(StageOutcome::with_message(format!(
            "BIDS dataset {} generated",
            dataset
        )))
    }
}

/// Looks for `bids/<dataset>/dataset_description.json`.
async fn probe(dir: &Path) -> Result<Probe<String>, StageError> {
    let pending = || Probe::Pending(Some(format!("no dataset under {}/", names::BIDS_ROOT)));

    let mut entries = match tokio::fs::read_dir(dir.join(names::BIDS_ROOT)).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(pending()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if tokio::fs::try_exists(entry.path().join(names::DATASET_DESCRIPTION)).await? {
            found.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    found.sort();

    Ok(found.into_iter().next().map(Probe::Ready).unwrap_or_else(pending))
}
