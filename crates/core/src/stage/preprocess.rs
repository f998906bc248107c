//! Preprocess stage: scan uploads and produce the analysis result.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::config::StageCommandConfig;
use super::error::StageError;
use super::process::{Probe, StageProcess};
use super::traits::StageHandler;
use super::types::{Stage, StageJob, StageOutcome};
use crate::artifact::names;

/// Fields of the analysis result the orchestrator relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub series: Vec<Value>,
    pub objects: Vec<Value>,
    #[serde(default)]
    pub subjects: Vec<Value>,
}

/// Runs the preprocessing program and waits for the manifest and analysis result.
pub struct PreprocessHandler {
    config: StageCommandConfig,
}

impl PreprocessHandler {
    pub fn new(config: StageCommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StageHandler for PreprocessHandler {
    fn stage(&self) -> Stage {
        Stage::Preprocess
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.timeout_secs))
    }

    async fn run(&self, job: &StageJob) -> Result<StageOutcome, StageError> {
        let dir = job.workdir.as_path();
        let (inputs, analysis) = StageProcess::new(Stage::Preprocess, &self.config)
            .run_until_ready(job, names::ANALYSIS_RESULT, || probe(dir))
            .await?;

        info!(
            "Session {} analyzed: {} inputs, {} series, {} objects",
            job.session_id,
            inputs,
            analysis.series.len(),
            analysis.objects.len()
        );

        Ok(StageOutcome::with_message(format!(
            "analyzed {} inputs into {} series and {} objects",
            inputs,
            analysis.series.len(),
            analysis.objects.len()
        )))
    }
}

async fn probe(dir: &Path) -> Result<Probe<(usize, AnalysisSummary)>, StageError> {
    let manifest = match tokio::fs::read_to_string(dir.join(names::MANIFEST)).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Probe::Pending(Some(format!("{} not written", names::MANIFEST))))
        }
        Err(e) => return Err(e.into()),
    };
    let inputs = manifest.lines().filter(|l| !l.trim().is_empty()).count();
    if inputs == 0 {
        return Ok(Probe::Malformed {
            artifact: names::MANIFEST.to_string(),
            reason: "no convertible inputs found".to_string(),
        });
    }

    let bytes = match tokio::fs::read(dir.join(names::ANALYSIS_RESULT)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Probe::Pending(Some(format!(
                "{} not written",
                names::ANALYSIS_RESULT
            ))))
        }
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<AnalysisSummary>(&bytes) {
        Ok(analysis) => Ok(Probe::Ready((inputs, analysis))),
        Err(e) => Ok(Probe::Malformed {
            artifact: names::ANALYSIS_RESULT.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler(script: &str) -> PreprocessHandler {
        PreprocessHandler::new(
            StageCommandConfig::new("sh")
                .with_args(["-c", script, "sh"])
                .with_timeout(2)
                .with_artifact_poll_ms(20),
        )
    }

    fn job(temp: &TempDir) -> StageJob {
        StageJob {
            session_id: "s-1".to_string(),
            workdir: temp.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_analysis_produced() {
        let temp = TempDir::new().unwrap();
        let h = handler(
            r#"printf 'a/1.dcm\nb/2.dcm\n' > list
               echo '{"series": [{}], "objects": [{}, {}], "subjects": []}' > ezBIDS_core.json"#,
        );

        let outcome = h.run(&job(&temp)).await.unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("analyzed 2 inputs into 1 series and 2 objects")
        );
    }

    #[tokio::test]
    async fn test_empty_manifest_fails() {
        let temp = TempDir::new().unwrap();
        let h = handler(r#": > list; echo '{"series": [], "objects": []}' > ezBIDS_core.json"#);

        let err = h.run(&job(&temp)).await.unwrap_err();
        match err {
            StageError::ArtifactMalformed { artifact, .. } => assert_eq!(artifact, "list"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_analysis_missing_sections_fails() {
        let temp = TempDir::new().unwrap();
        let h = handler(r#"echo a.dcm > list; echo '{"series": []}' > ezBIDS_core.json"#);

        let err = h.run(&job(&temp)).await.unwrap_err();
        assert!(matches!(err, StageError::ArtifactMalformed { .. }));
    }

    #[tokio::test]
    async fn test_no_analysis_times_out() {
        let temp = TempDir::new().unwrap();
        let h = handler("echo a.dcm > list");

        let err = h.run(&job(&temp)).await.unwrap_err();
        assert!(err.status_message().contains("timed out"));
        assert!(err.status_message().contains("ezBIDS_core.json"));
    }
}
