//! Process execution for a single step.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::env::StepEnv;
use crate::error::{PipelineError, Result};
use crate::step::Step;

/// Bytes of stdout/stderr kept per step when output is captured.
pub const DEFAULT_CAPTURE_LIMIT: usize = 8 * 1024;

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Exit code, absent when the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Tail of captured stdout (empty when output is streamed).
    pub stdout: String,

    /// Tail of captured stderr (empty when output is streamed).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches the command behind a step.
///
/// Returns `Err(PipelineError::StepExecution)` when no exit status could be
/// obtained (spawn failure, timeout). A non-zero exit is an `Ok` output.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &Step,
        env: &StepEnv,
        working_dir: &Path,
    ) -> Result<ExecutionOutput>;
}

/// Executor that spawns real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    capture: bool,
    capture_limit: usize,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            capture: true,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let children write straight to this process's stdout/stderr.
    pub fn streaming() -> Self {
        Self {
            capture: false,
            ..Self::default()
        }
    }

    pub fn with_capture_limit(mut self, bytes: usize) -> Self {
        self.capture_limit = bytes;
        self
    }
}

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn execute(
        &self,
        step: &Step,
        env: &StepEnv,
        working_dir: &Path,
    ) -> Result<ExecutionOutput> {
        let start = Instant::now();
        let argv = step.command.to_argv();
        let (exe, args) = argv.split_first().ok_or_else(|| {
            PipelineError::config(format!("step '{}' has an empty command", step.name))
        })?;

        let (stdout, stderr) = if self.capture {
            (Stdio::piped(), Stdio::piped())
        } else {
            (Stdio::inherit(), Stdio::inherit())
        };

        debug!(step = %step.name, command = %step.command, "spawning");

        let mut command = Command::new(exe);
        command
            .args(args)
            .env_clear()
            .envs(env)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        // own process group, so a timeout can take down everything the step started
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| PipelineError::StepExecution {
            step: step.name.clone(),
            reason: format!("failed to spawn '{}': {}", exe, e),
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let finished = {
            let collect = async {
                let (status, out, err) = tokio::join!(
                    child.wait(),
                    read_pipe(stdout_pipe.as_mut()),
                    read_pipe(stderr_pipe.as_mut())
                );
                status.map(|status| (status, out, err))
            };
            match step.timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), collect)
                    .await
                    .ok(),
                None => Some(collect.await),
            }
        };

        let Some(finished) = finished else {
            let secs = step.timeout_secs.unwrap_or_default();
            warn!(step = %step.name, timeout_secs = secs, "Step timed out, killing process group");
            terminate(&mut child).await;
            return Err(PipelineError::StepExecution {
                step: step.name.clone(),
                reason: format!("timed out after {} seconds", secs),
            });
        };

        let (status, out, err) = finished.map_err(|e| PipelineError::StepExecution {
            step: step.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(ExecutionOutput {
            exit_code: status.code(),
            stdout: tail(&out, self.capture_limit),
            stderr: tail(&err, self.capture_limit),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Drain a captured pipe. Read errors end the capture early.
async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// Kill the child's whole process group, then reap the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to the group created at spawn; the
        // child is not yet reaped, so its pid still names that group.
        let ret = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if ret != 0 {
            debug!(pid, error = %std::io::Error::last_os_error(), "killpg failed");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "failed to reap timed-out child");
    }
}

/// Last `limit` bytes of `bytes`, lossily decoded.
fn tail(bytes: &[u8], limit: usize) -> String {
    let from = bytes.len().saturating_sub(limit);
    String::from_utf8_lossy(&bytes[from..]).into_owned()
}
