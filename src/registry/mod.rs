//! In-memory job registry.
//!
//! The registry is the single source of truth for job status. It is shared
//! by the request path, one executor task per running job, and the retention
//! sweeper; all of them go through per-key atomic operations.
//!
//! Records are not persisted: restarting the process forgets every job while
//! leaving its files on disk until they are removed by hand.

pub mod job;
pub mod store;

pub use job::{JobRecord, JobStatus, JobUpdate};
pub use store::{JobRegistry, UpdateOutcome};
