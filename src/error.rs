use thiserror::Error;
use uuid::Uuid;

use crate::registry::JobStatus;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {job_id} is {status}, expected {expected}")]
    InvalidState {
        job_id: Uuid,
        status: JobStatus,
        expected: JobStatus,
    },

    #[error("Job {0} already has an input file")]
    InputAlreadyAttached(Uuid),

    #[error("Job {0} has no input file")]
    MissingInput(Uuid),

    #[error("Forbidden module or function detected: {0}")]
    CodeRejected(&'static str),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Results not available yet, job is {0}")]
    NotReady(JobStatus),

    #[error("No results found")]
    NoResults,

    #[error("Job registry is at capacity")]
    RegistryFull,

    #[error("Duplicate job id: {0}")]
    DuplicateJob(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
