//! Supervision of a stage's external process.

use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use super::config::StageCommandConfig;
use super::error::StageError;
use super::types::{Stage, StageJob};

/// Lines of captured output kept in failure messages.
const DIAGNOSTIC_LINES: usize = 20;

/// Longest wait for a request file that the API publishes after claiming.
const INPUT_WAIT: Duration = Duration::from_secs(10);

/// Stand-in deadline when a configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of one look at a stage's expected artifacts.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Artifacts exist and parse.
    Ready(T),
    /// Artifacts are absent or incomplete, with an optional description of what is missing.
    Pending(Option<String>),
    /// Artifacts exist but cannot be parsed.
    Malformed { artifact: String, reason: String },
}

/// Launches a stage program and watches for its artifacts.
///
/// Success requires both a zero exit status and a `Ready` probe. A
/// `Malformed` probe is only final once the process has exited, since the
/// artifact may still be in the middle of being written.
pub struct StageProcess<'a> {
    stage: Stage,
    config: &'a StageCommandConfig,
}

impl<'a> StageProcess<'a> {
    pub fn new(stage: Stage, config: &'a StageCommandConfig) -> Self {
        Self { stage, config }
    }

    /// Run the program for `job` until `probe` reports ready, the process
    /// fails, or the deadline passes.
    pub async fn run_until_ready<T, F, Fut>(
        &self,
        job: &StageJob,
        artifact: &str,
        mut probe: F,
    ) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, StageError>>,
    {
        let mut child = self.spawn(&job.workdir)?;
        let mut group = ProcessGroup::of(&child);
        info!(
            "Started {} for session {} (pid {:?})",
            self.stage,
            job.session_id,
            child.id()
        );

        let deadline = deadline_after(Duration::from_secs(self.config.timeout_secs));
        let poll_interval = Duration::from_millis(self.config.artifact_poll_ms.max(1));
        let mut exited = false;
        let mut last_detail = None;

        loop {
            if !exited {
                if let Some(status) = child.try_wait()? {
                    if !status.success() {
                        return Err(self.process_failure(&job.workdir, status).await);
                    }
                    debug!("{} exited cleanly for session {}", self.stage, job.session_id);
                    exited = true;
                }
            }

            match probe().await? {
                Probe::Ready(value) => {
                    if exited {
                        return Ok(value);
                    }
                    if Instant::now() >= deadline {
                        warn!(
                            "{} for session {} still running at deadline with artifacts ready, stopping it",
                            self.stage, job.session_id
                        );
                        kill(&mut child, &mut group).await;
                        return Ok(value);
                    }
                }
                Probe::Malformed { artifact, reason } if exited => {
                    return Err(StageError::ArtifactMalformed { artifact, reason });
                }
                Probe::Malformed { .. } => {}
                Probe::Pending(detail) => last_detail = detail,
            }

            let now = Instant::now();
            if now >= deadline {
                if !exited {
                    warn!(
                        "{} for session {} timed out after {}s, killing process",
                        self.stage, job.session_id, self.config.timeout_secs
                    );
                    kill(&mut child, &mut group).await;
                }
                return Err(StageError::ArtifactTimeout {
                    artifact: artifact.to_string(),
                    timeout_secs: self.config.timeout_secs,
                    detail: last_detail,
                });
            }

            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn spawn(&self, workdir: &Path) -> Result<Child, StageError> {
        let stdout = std::fs::File::create(workdir.join(self.stage.log_file()))?;
        let stderr = std::fs::File::create(workdir.join(self.stage.err_file()))?;

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(workdir)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        // Own process group, so anything the program forks can be killed with it
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(|e| StageError::ProcessFailure {
            program: self.config.program_name(),
            reason: if e.kind() == io::ErrorKind::NotFound {
                format!("program not found: {}", self.config.program.display())
            } else {
                format!("failed to start: {}", e)
            },
            diagnostics: None,
        })
    }

    async fn process_failure(&self, workdir: &Path, status: ExitStatus) -> StageError {
        let mut diagnostics = output_tail(&workdir.join(self.stage.err_file())).await;
        if diagnostics.is_none() {
            diagnostics = output_tail(&workdir.join(self.stage.log_file())).await;
        }
        StageError::ProcessFailure {
            program: self.config.program_name(),
            reason: format!("exited with {}", status),
            diagnostics,
        }
    }
}

async fn kill(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.kill().await {
        warn!("Failed to kill stage process: {}", e);
    }
}

/// The process group a stage program leads.
///
/// Killed when supervision ends, on every return path and when the
/// supervising future is dropped.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// `now + wait`, saturating to a far-future instant.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Read a file the API publishes alongside a status change.
///
/// The file is renamed into place just after the claim commits, so a worker
/// may briefly see the trigger status before the file exists.
pub(super) async fn wait_for_input(
    dir: &Path,
    name: &str,
    config: &StageCommandConfig,
) -> Result<Vec<u8>, StageError> {
    let wait = INPUT_WAIT.min(Duration::from_secs(config.timeout_secs));
    let deadline = deadline_after(wait);
    let poll_interval = Duration::from_millis(config.artifact_poll_ms.max(1));
    let path = dir.join(name);

    loop {
        match tokio::fs::read(&path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(StageError::MissingInput {
                artifact: name.to_string(),
            });
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Last lines of a captured output file, if it has any content.
async fn output_tail(path: &Path) -> Option<String> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    Some(lines[start..].join("\n"))
}
