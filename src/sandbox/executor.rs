use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::registry::{JobRegistry, JobStatus, JobUpdate, UpdateOutcome};
use crate::sandbox::invocation::{ExecutionRequest, SandboxInvocation};
use crate::sandbox::launcher::ProcessLauncher;

/// Runs submitted code in a container and records the outcome.
///
/// All jobs run in sandboxed containers with:
/// - Read-only mounts for the input file and the code
/// - A single writable mount for results
/// - Memory and CPU limits, no network, dropped capabilities
///
/// The executor only ever writes to the registry. Output produced before a
/// timeout kill is discarded, so a `timeout` record never carries
/// `stdout`/`stderr`.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: SandboxConfig,
    launcher: Arc<dyn ProcessLauncher>,
    registry: Arc<JobRegistry>,
}

enum WaitOutcome {
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    WaitFailed(std::io::Error),
}

impl SandboxExecutor {
    pub fn new(
        config: SandboxConfig,
        launcher: Arc<dyn ProcessLauncher>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            config,
            launcher,
            registry,
        }
    }

    /// Execute one job to a terminal state and return that state.
    ///
    /// Nothing is launched unless the job can still move to `running`.
    /// Returns `None` when the job was deleted before launch, or the state it
    /// already holds when that state refuses the move.
    pub async fn execute(&self, request: ExecutionRequest) -> Option<JobStatus> {
        let job_id = request.job_id;
        match self.record(job_id, JobUpdate::status(JobStatus::Running)) {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Missing => {
                tracing::info!(job_id = %job_id, "Job deleted before launch, skipping execution");
                return None;
            }
            UpdateOutcome::Rejected { current } => {
                tracing::info!(job_id = %job_id, status = %current, "Job no longer runnable, skipping execution");
                return Some(current);
            }
        }

        let invocation =
            SandboxInvocation::build(&self.config, &request, self.launcher.path_style());
        let rendered = invocation.render();
        tracing::info!(job_id = %job_id, command = %rendered, "Executing job");
        self.record(
            job_id,
            JobUpdate::status(JobStatus::Running).with_docker_cmd(rendered),
        );

        let mut child = match self.launcher.spawn(&invocation.program, &invocation.args) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id = %job_id, runtime = %invocation.program, error = %e, "Failed to launch sandbox");
                let detail = format!(
                    "Failed to launch sandbox runtime '{}': {}",
                    invocation.program, e
                );
                return Some(self.finish(job_id, JobUpdate::failed(detail)));
            }
        };

        let update = match self.wait(&mut child, request.timeout).await {
            WaitOutcome::Exited {
                code: Some(0),
                stdout,
                stderr,
            } => JobUpdate::status(JobStatus::Completed).with_output(stdout, stderr),
            WaitOutcome::Exited {
                code,
                stdout,
                stderr,
            } => {
                let code =
                    code.map_or_else(|| "terminated by signal".to_string(), |c| c.to_string());
                let detail = format!("Exit code: {}\nStderr: {}", code, stderr);
                JobUpdate::failed(detail).with_output(stdout, stderr)
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(job_id = %job_id, timeout = ?request.timeout, "Job exceeded deadline, terminating");
                self.terminate(job_id, &mut child, &invocation).await;
                JobUpdate::status(JobStatus::Timeout).with_error(format!(
                    "Execution timed out after {} seconds",
                    request.timeout.as_secs_f64()
                ))
            }
            WaitOutcome::WaitFailed(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed waiting for sandbox process");
                self.terminate(job_id, &mut child, &invocation).await;
                JobUpdate::failed(format!("Failed waiting for sandbox process: {}", e))
            }
        };

        Some(self.finish(job_id, update))
    }

    async fn wait(&self, child: &mut Child, deadline: Duration) -> WaitOutcome {
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_stream(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_stream(s)));

        match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => WaitOutcome::Exited {
                code: status.code(),
                stdout: self.collect(stdout).await,
                stderr: self.collect(stderr).await,
            },
            Ok(Err(e)) => {
                abort(stdout);
                abort(stderr);
                WaitOutcome::WaitFailed(e)
            }
            Err(_) => {
                abort(stdout);
                abort(stderr);
                WaitOutcome::TimedOut
            }
        }
    }

    /// Join a reader task. Bounded because a process left behind by the
    /// runtime can keep the pipe open after the runtime itself exited.
    async fn collect(&self, reader: Option<JoinHandle<Vec<u8>>>) -> String {
        let Some(reader) = reader else {
            return String::new();
        };
        match tokio::time::timeout(self.config.kill_grace, reader).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Output reader task failed");
                String::new()
            }
            Err(_) => {
                tracing::warn!("Output pipe still open after process exit, dropping output");
                String::new()
            }
        }
    }

    /// Stop the container and the host-side launcher, then confirm exit.
    ///
    /// The runtime kill goes first because killing the launcher alone leaves
    /// a detached container running.
    async fn terminate(&self, job_id: Uuid, child: &mut Child, invocation: &SandboxInvocation) {
        let grace = self.config.kill_grace;

        match self.launcher.spawn(&invocation.program, &invocation.kill_args()) {
            Ok(mut kill) => match tokio::time::timeout(grace, kill.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    tracing::debug!(job_id = %job_id, container = %invocation.container_name, "Container killed");
                }
                Ok(Ok(status)) => {
                    tracing::debug!(job_id = %job_id, container = %invocation.container_name, status = %status, "Runtime kill reported failure");
                }
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Runtime kill failed");
                }
                Err(_) => {
                    tracing::warn!(job_id = %job_id, container = %invocation.container_name, "Runtime kill did not finish in time");
                }
            },
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not spawn runtime kill");
            }
        }

        if let Err(e) = self.launcher.terminate(child) {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to signal sandbox process");
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(job_id = %job_id, status = %status, "Sandbox process exited after kill");
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not confirm sandbox process exit");
            }
            Err(_) => {
                tracing::warn!(job_id = %job_id, grace = ?grace, "Sandbox process still running after kill");
            }
        }
    }

    fn finish(&self, job_id: Uuid, update: JobUpdate) -> JobStatus {
        let status = update.status;
        self.record(job_id, update);
        tracing::info!(job_id = %job_id, status = %status, "Job finished");
        status
    }

    fn record(&self, job_id: Uuid, update: JobUpdate) -> UpdateOutcome {
        let status = update.status;
        let outcome = self.registry.update(&job_id, update);
        match outcome {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Missing => {
                tracing::debug!(job_id = %job_id, status = %status, "Job deleted during execution, update dropped");
            }
            UpdateOutcome::Rejected { current } => {
                tracing::warn!(job_id = %job_id, from = %current, to = %status, "Refused job status transition");
            }
        }
        outcome
    }
}

async fn read_stream<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "Output stream ended with error");
    }
    buf
}

fn abort(reader: Option<JoinHandle<Vec<u8>>>) {
    if let Some(reader) = reader {
        reader.abort();
    }
}
