//! Configuration for stage processes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::Stage;

/// How to launch and supervise the external process of one stage.
///
/// The session working directory is appended as the final argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageCommandConfig {
    /// Program to execute.
    pub program: PathBuf,

    /// Arguments placed before the working directory.
    #[serde(default)]
    pub args: Vec<String>,

    /// Deadline for the expected artifacts, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Interval between artifact checks, in milliseconds.
    #[serde(default = "default_artifact_poll_ms")]
    pub artifact_poll_ms: u64,
}

fn default_timeout() -> u64 {
    3600 // 1 hour
}

fn default_artifact_poll_ms() -> u64 {
    1000
}

impl StageCommandConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: default_timeout(),
            artifact_poll_ms: default_artifact_poll_ms(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Sets the artifact check interval in milliseconds.
    pub fn with_artifact_poll_ms(mut self, artifact_poll_ms: u64) -> Self {
        self.artifact_poll_ms = artifact_poll_ms;
        self
    }

    /// Display name of the program, for logs and messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

/// Process configuration for every stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagesConfig {
    #[serde(default = "default_preprocess")]
    pub preprocess: StageCommandConfig,

    #[serde(default = "default_deface")]
    pub deface: StageCommandConfig,

    #[serde(default = "default_finalize")]
    pub finalize: StageCommandConfig,
}

fn default_preprocess() -> StageCommandConfig {
    StageCommandConfig::new("./handler/preprocess.sh").with_timeout(4 * 3600)
}

fn default_deface() -> StageCommandConfig {
    StageCommandConfig::new("./handler/deface.sh")
}

fn default_finalize() -> StageCommandConfig {
    StageCommandConfig::new("./handler/bids.sh")
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            preprocess: default_preprocess(),
            deface: default_deface(),
            finalize: default_finalize(),
        }
    }
}

impl StagesConfig {
    pub fn for_stage(&self, stage: Stage) -> &StageCommandConfig {
        match stage {
            Stage::Preprocess => &self.preprocess,
            Stage::Deface => &self.deface,
            Stage::Finalize => &self.finalize,
        }
    }
}
