//! Job lifecycle: upload, submit, execute in the background, fetch, delete.
//!
//! The coordinator owns no job state of its own. Every decision reads or
//! transitions the [`JobRegistry`], and once a job is dispatched only its
//! executor task writes to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::cleanup::{remove_artifacts, CleanupReport};
use crate::config::{ServiceConfig, StorageConfig, UploadLimits};
use crate::error::{ProcessorError, Result};
use crate::filter;
use crate::registry::{JobRecord, JobRegistry, JobStatus, JobUpdate, UpdateOutcome};
use crate::sandbox::{ExecutionRequest, ProcessLauncher, SandboxExecutor};
use crate::template::PROCESSING_TEMPLATE;

/// Preferred kind of result file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFormat {
    #[default]
    Json,
    Csv,
    Excel,
}

impl ResultFormat {
    /// Unknown hints fall back to JSON.
    pub fn from_hint(hint: &str) -> Self {
        match hint.to_ascii_lowercase().as_str() {
            "csv" => ResultFormat::Csv,
            "excel" | "xlsx" | "xls" => ResultFormat::Excel,
            _ => ResultFormat::Json,
        }
    }
}

/// What kind of file [`JobCoordinator::get_result`] picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Json,
    Csv,
    Excel,
    Other,
}

impl ResultKind {
    pub fn content_type(self) -> &'static str {
        match self {
            ResultKind::Json => "application/json",
            ResultKind::Csv => "text/csv",
            ResultKind::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ResultKind::Other => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub path: PathBuf,
    pub kind: ResultKind,
    /// Suggested name for the client-side download.
    pub download_name: String,
}

#[derive(Debug)]
pub struct JobCoordinator {
    registry: Arc<JobRegistry>,
    executor: SandboxExecutor,
    storage: StorageConfig,
    limits: UploadLimits,
    max_execution_time: Duration,
    executions: TaskTracker,
}

impl JobCoordinator {
    /// Build a coordinator and make sure the artifact directories exist.
    pub async fn open(config: &ServiceConfig, launcher: Arc<dyn ProcessLauncher>) -> Result<Self> {
        config.storage.ensure_dirs().await?;

        let registry = Arc::new(JobRegistry::with_capacity(config.registry_capacity));
        let executor = SandboxExecutor::new(config.sandbox.clone(), launcher, registry.clone());

        tracing::info!(
            data_dir = %config.storage.root.display(),
            runtime = %config.sandbox.runtime,
            image = %config.sandbox.image,
            max_execution_time = ?config.max_execution_time,
            "Job coordinator ready"
        );

        Ok(Self {
            registry,
            executor,
            storage: config.storage.clone(),
            limits: config.limits.clone(),
            max_execution_time: config.max_execution_time,
            executions: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Register a new job in `uploaded` for `filename`.
    pub fn create_job(&self, filename: &str) -> Result<Uuid> {
        Ok(self.new_job(filename)?.id)
    }

    fn new_job(&self, filename: &str) -> Result<JobRecord> {
        let name = base_name(filename);
        if name.is_empty() {
            return Err(ProcessorError::InvalidUpload("No file selected".to_string()));
        }
        if !self.limits.allows(name) {
            return Err(ProcessorError::InvalidUpload(format!(
                "File type not allowed. Supported formats: {}",
                self.limits.allowed_extensions.join(", ")
            )));
        }

        let record = JobRecord::new(name.to_string());
        self.registry.put(record.clone())?;
        tracing::debug!(job_id = %record.id, filename = %record.filename, "Job created");
        Ok(record)
    }

    /// Create a job, store `contents` as its input and attach it.
    ///
    /// An oversized or unwritable upload removes the job it just created.
    pub async fn upload(&self, filename: &str, contents: &[u8]) -> Result<Uuid> {
        let record = self.new_job(filename)?;
        let id = record.id;

        if contents.len() > self.limits.max_upload_bytes {
            self.discard(&id);
            return Err(ProcessorError::InvalidUpload(self.limits.too_large_message()));
        }

        let path = self
            .storage
            .uploads_dir()
            .join(format!("{}_{}", id, record.filename));
        if let Err(e) = tokio::fs::write(&path, contents).await {
            tracing::error!(job_id = %id, path = %path.display(), error = %e, "Failed to store upload");
            self.discard(&id);
            return Err(e.into());
        }

        self.attach_input(&id, path)?;
        tracing::info!(job_id = %id, filename = %record.filename, bytes = contents.len(), "File uploaded");
        Ok(id)
    }

    /// Record `path` as the job's input file. Allowed once, while `uploaded`.
    pub fn attach_input(&self, id: &Uuid, path: PathBuf) -> Result<()> {
        self.registry.modify(id, |record| {
            if record.status != JobStatus::Uploaded {
                return Err(ProcessorError::InvalidState {
                    job_id: record.id,
                    status: record.status,
                    expected: JobStatus::Uploaded,
                });
            }
            if record.input_path.is_some() {
                return Err(ProcessorError::InputAlreadyAttached(record.id));
            }
            record.input_path = Some(path);
            Ok(())
        })?
    }

    /// Validate `source`, claim the job, write its files and start execution.
    ///
    /// Returns the record as claimed (status `processing`). Execution runs on
    /// its own task and reports only through the registry.
    pub async fn submit_code(&self, id: &Uuid, source: &str) -> Result<JobRecord> {
        let current = self.registry.get(id)?;

        if let Err(token) = filter::validate(source) {
            tracing::warn!(job_id = %id, token, "Submission rejected by denylist");
            return Err(ProcessorError::CodeRejected(token));
        }

        let Some(input_path) = current.input_path else {
            return Err(if current.status == JobStatus::Uploaded {
                ProcessorError::MissingInput(*id)
            } else {
                ProcessorError::InvalidState {
                    job_id: *id,
                    status: current.status,
                    expected: JobStatus::Uploaded,
                }
            });
        };

        let code_path = self.storage.code_dir().join(format!("{}_process.py", id));
        let result_dir = self.storage.results_dir().join(id.to_string());

        let claimed = self.registry.transition(
            id,
            JobStatus::Uploaded,
            JobUpdate::status(JobStatus::Processing)
                .with_paths(code_path.clone(), result_dir.clone()),
        )?;

        if let Err(e) = prepare_files(&code_path, &result_dir, source).await {
            tracing::error!(job_id = %id, error = %e, "Failed to prepare job files");
            self.mark_failed(id, format!("Failed to prepare job files: {}", e));
            return Err(e.into());
        }

        let request = ExecutionRequest {
            job_id: *id,
            input_path,
            code_path,
            result_dir,
            timeout: self.max_execution_time,
        };
        let executor = self.executor.clone();
        self.executions.spawn(async move {
            executor.execute(request).await;
        });

        tracing::info!(job_id = %id, "Code submitted, execution dispatched");
        Ok(claimed)
    }

    pub fn get_status(&self, id: &Uuid) -> Result<JobRecord> {
        self.registry.get(id)
    }

    /// Pick the result file for a completed job.
    ///
    /// Preference: the requested kind, then any JSON file, then the first
    /// file by name.
    pub async fn get_result(&self, id: &Uuid, format: ResultFormat) -> Result<ResultFile> {
        let record = self.registry.get(id)?;
        if record.status != JobStatus::Completed {
            return Err(ProcessorError::NotReady(record.status));
        }
        let Some(result_dir) = record.result_dir else {
            return Err(ProcessorError::NoResults);
        };

        let names = list_files(&result_dir).await?;
        let pick = |kind: ResultKind, exts: &[&str]| {
            names
                .iter()
                .find(|name| has_extension(name, exts))
                .map(|name| (kind, name))
        };

        let preferred = match format {
            ResultFormat::Csv => pick(ResultKind::Csv, &["csv"]),
            ResultFormat::Excel => pick(ResultKind::Excel, &["xlsx", "xls"]),
            ResultFormat::Json => None,
        };

        let (kind, name) = match preferred.or_else(|| pick(ResultKind::Json, &["json"])) {
            Some(found) => found,
            None => match names.first() {
                Some(first) => (ResultKind::Other, first),
                None => return Err(ProcessorError::NoResults),
            },
        };

        let download_name = match kind {
            ResultKind::Csv => format!("result_{}.csv", id),
            ResultKind::Excel => format!("result_{}.xlsx", id),
            ResultKind::Json => format!("result_{}.json", id),
            ResultKind::Other => format!("result_{}_{}", id, name),
        };

        Ok(ResultFile {
            path: result_dir.join(name),
            kind,
            download_name,
        })
    }

    /// Remove a job's artifacts, then its record.
    ///
    /// The record stays when any artifact could not be removed, so a later
    /// delete or sweep can retry. A job that is still executing keeps
    /// running; its remaining status updates find no record and are dropped.
    pub async fn delete_job(&self, id: &Uuid) -> Result<CleanupReport> {
        let record = self.registry.get(id)?;
        let report = remove_artifacts(&record).await;

        if !report.is_clean() {
            tracing::warn!(job_id = %id, failed = report.failed(), "Job kept, artifacts left on disk");
            return Ok(report);
        }

        match self.registry.delete(id) {
            Ok(_) | Err(ProcessorError::JobNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        tracing::info!(job_id = %id, removed = report.attempted(), "Job cleaned up");
        Ok(report)
    }

    pub fn get_template(&self) -> &'static str {
        PROCESSING_TEMPLATE
    }

    /// Number of executions still in flight.
    pub fn running_executions(&self) -> usize {
        self.executions.len()
    }

    /// Wait for every dispatched execution to reach a terminal state.
    pub async fn wait_for_executions(&self) {
        self.executions.close();
        self.executions.wait().await;
    }

    fn discard(&self, id: &Uuid) {
        if let Err(e) = self.registry.delete(id) {
            tracing::debug!(job_id = %id, error = %e, "Job already gone while discarding upload");
        }
    }

    fn mark_failed(&self, id: &Uuid, detail: String) {
        match self.registry.update(id, JobUpdate::failed(detail)) {
            UpdateOutcome::Applied => {}
            outcome => {
                tracing::warn!(job_id = %id, outcome = ?outcome, "Could not mark job as failed");
            }
        }
    }
}

/// Strip any directory components, accepting both separators.
fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
}

fn has_extension(name: &str, exts: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| exts.contains(&ext.as_str()))
}

async fn prepare_files(code_path: &Path, result_dir: &Path, source: &str) -> std::io::Result<()> {
    tokio::fs::write(code_path, source).await?;
    tokio::fs::create_dir_all(result_dir).await
}

/// Regular files directly inside `dir`, sorted by name.
async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ProcessorError::NoResults)
        }
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
