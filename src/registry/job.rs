use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Uploaded,
        JobStatus::Processing,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Timeout,
    ];

    /// Completed, failed and timed-out jobs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// A running job may be "re-entered" so the executor can attach diagnostic
    /// fields without leaving the state. Any non-terminal job may fail.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed) => true,
            (Uploaded, Processing) => true,
            (Processing, Running) => true,
            (Running, Running | Completed | Timeout) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Uploaded => write!(f, "uploaded"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rendered runtime invocation, kept for diagnostics only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_cmd: Option<String>,
}

impl JobRecord {
    pub fn new(filename: String) -> Self {
        Self::with_id(Uuid::new_v4(), filename, Utc::now())
    }

    pub fn with_id(id: Uuid, filename: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            filename,
            status: JobStatus::Uploaded,
            timestamp,
            input_path: None,
            code_path: None,
            result_dir: None,
            stdout: None,
            stderr: None,
            error: None,
            docker_cmd: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply `update` in place. Callers must have checked the transition.
    fn apply(&mut self, update: JobUpdate) {
        self.status = update.status;
        if let Some(path) = update.input_path {
            self.input_path = Some(path);
        }
        if let Some(path) = update.code_path {
            self.code_path = Some(path);
        }
        if let Some(dir) = update.result_dir {
            self.result_dir = Some(dir);
        }
        if let Some(stdout) = update.stdout {
            self.stdout = Some(stdout);
        }
        if let Some(stderr) = update.stderr {
            self.stderr = Some(stderr);
        }
        if let Some(cmd) = update.docker_cmd {
            self.docker_cmd = Some(cmd);
        }
        if matches!(update.status, JobStatus::Failed | JobStatus::Timeout) {
            if let Some(error) = update.error {
                self.error = Some(error);
            }
        }
    }

    /// Checks the transition and applies the update if allowed.
    pub(crate) fn try_apply(&mut self, update: JobUpdate) -> bool {
        if !self.status.can_transition_to(update.status) {
            return false;
        }
        self.apply(update);
        true
    }
}

/// A status change plus the fields that travel with it.
///
/// Absent fields leave the stored value untouched, so an update can never
/// clear a previously recorded path, output or error.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub input_path: Option<PathBuf>,
    pub code_path: Option<PathBuf>,
    pub result_dir: Option<PathBuf>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
    pub docker_cmd: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            input_path: None,
            code_path: None,
            result_dir: None,
            stdout: None,
            stderr: None,
            error: None,
            docker_cmd: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::status(JobStatus::Failed).with_error(error)
    }

    pub fn with_input_path(mut self, path: PathBuf) -> Self {
        self.input_path = Some(path);
        self
    }

    pub fn with_paths(mut self, code_path: PathBuf, result_dir: PathBuf) -> Self {
        self.code_path = Some(code_path);
        self.result_dir = Some(result_dir);
        self
    }

    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_docker_cmd(mut self, cmd: String) -> Self {
        self.docker_cmd = Some(cmd);
        self
    }
}
