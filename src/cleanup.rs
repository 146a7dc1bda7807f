//! Best-effort removal of a job's on-disk artifacts.
//!
//! Every artifact is attempted independently and the outcome recorded in a
//! [`CleanupReport`]. Reports go to logs only; callers never see an error
//! from cleanup.

use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::registry::JobRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Input,
    Code,
    Results,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Input => write!(f, "input"),
            ArtifactKind::Code => write!(f, "code"),
            ArtifactKind::Results => write!(f, "results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed,
    AlreadyGone,
    PermissionDenied,
    /// Any other I/O failure. These are unexpected and logged at error level.
    Failed(io::ErrorKind),
}

impl RemovalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemovalOutcome::Removed | RemovalOutcome::AlreadyGone)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactRemoval {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub outcome: RemovalOutcome,
}

#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub job_id: Uuid,
    pub items: Vec<ArtifactRemoval>,
}

impl CleanupReport {
    pub fn attempted(&self) -> usize {
        self.items.len()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// Remove input file, code file and result directory of `record`.
pub async fn remove_artifacts(record: &JobRecord) -> CleanupReport {
    let targets = [
        (ArtifactKind::Input, record.input_path.as_deref()),
        (ArtifactKind::Code, record.code_path.as_deref()),
        (ArtifactKind::Results, record.result_dir.as_deref()),
    ];

    let mut items = Vec::new();
    for (kind, path) in targets {
        let Some(path) = path else { continue };
        let outcome = remove(kind, path).await;
        log_outcome(record.id, kind, path, &outcome);
        items.push(ArtifactRemoval {
            kind,
            path: path.to_path_buf(),
            outcome,
        });
    }

    let report = CleanupReport {
        job_id: record.id,
        items,
    };
    tracing::debug!(
        job_id = %record.id,
        attempted = report.attempted(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Artifact cleanup finished"
    );
    report
}

async fn remove(kind: ArtifactKind, path: &Path) -> RemovalOutcome {
    let result = match kind {
        ArtifactKind::Results => tokio::fs::remove_dir_all(path).await,
        ArtifactKind::Input | ArtifactKind::Code => tokio::fs::remove_file(path).await,
    };
    match result {
        Ok(()) => RemovalOutcome::Removed,
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => RemovalOutcome::AlreadyGone,
            io::ErrorKind::PermissionDenied => RemovalOutcome::PermissionDenied,
            other => RemovalOutcome::Failed(other),
        },
    }
}

fn log_outcome(job_id: Uuid, kind: ArtifactKind, path: &Path, outcome: &RemovalOutcome) {
    let path = path.display();
    match outcome {
        RemovalOutcome::Removed => {
            tracing::debug!(job_id = %job_id, artifact = %kind, path = %path, "Artifact removed");
        }
        RemovalOutcome::AlreadyGone => {
            tracing::debug!(job_id = %job_id, artifact = %kind, path = %path, "Artifact already gone");
        }
        RemovalOutcome::PermissionDenied => {
            tracing::warn!(job_id = %job_id, artifact = %kind, path = %path, "Permission denied removing artifact");
        }
        RemovalOutcome::Failed(error_kind) => {
            tracing::error!(job_id = %job_id, artifact = %kind, path = %path, error_kind = ?error_kind, "Unexpected failure removing artifact");
        }
    }
}
