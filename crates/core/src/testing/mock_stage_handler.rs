//! Mock stage handler for testing.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::stage::{Stage, StageError, StageHandler, StageJob, StageOutcome};

#[derive(Debug, Clone)]
enum Behavior {
    Succeed(String),
    Fail(String),
}

/// Mock implementation of the StageHandler trait.
///
/// Provides controllable behavior for testing:
/// - Record which sessions were run
/// - Simulate success/failure and slow handlers
/// - Write artifacts into the working directory before returning
///
/// # Example
///
/// ```rust,ignore
/// use ezbids_core::testing::MockStageHandler;
///
/// let handler = MockStageHandler::succeeding(Stage::Preprocess, "analyzed")
///     .with_artifact("ezBIDS_core.json", br#"{"series": [], "objects": []}"#);
///
/// // Give it to a StagePoller, then
/// assert_eq!(handler.runs().len(), 1);
/// ```
#[derive(Debug)]
pub struct MockStageHandler {
    stage: Stage,
    behavior: Behavior,
    delay: Duration,
    timeout: Option<Duration>,
    artifacts: Vec<(String, Vec<u8>)>,
    runs: Mutex<Vec<String>>,
}

impl MockStageHandler {
    /// A handler that succeeds with `message`.
    pub fn succeeding(stage: Stage, message: impl Into<String>) -> Self {
        Self::with_behavior(stage, Behavior::Succeed(message.into()))
    }

    /// A handler that fails with a process failure carrying `reason`.
    pub fn failing(stage: Stage, reason: impl Into<String>) -> Self {
        Self::with_behavior(stage, Behavior::Fail(reason.into()))
    }

    fn with_behavior(stage: Stage, behavior: Behavior) -> Self {
        Self {
            stage,
            behavior,
            delay: Duration::ZERO,
            timeout: None,
            artifacts: Vec::new(),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long before returning.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report this timeout to the poller, enabling stale-claim reaping.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Write `contents` to `relative` in the working directory on each run.
    pub fn with_artifact(mut self, relative: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((relative.into(), contents.into()));
        self
    }

    /// Session ids this handler has run, in order.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StageHandler for MockStageHandler {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run(&self, job: &StageJob) -> Result<StageOutcome, StageError> {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(job.session_id.clone());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        for (relative, contents) in &self.artifacts {
            let path = job.workdir.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, contents).await?;
        }

        match &self.behavior {
            Behavior::Succeed(message) => Ok(StageOutcome::with_message(message.clone())),
            Behavior::Fail(reason) => Err(StageError::ProcessFailure {
                program: format!("mock-{}", self.stage),
                reason: reason.clone(),
                diagnostics: None,
            }),
        }
    }
}
