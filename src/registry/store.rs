use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{ProcessorError, Result};
use crate::registry::job::{JobRecord, JobStatus, JobUpdate};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Result of [`JobRegistry::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// No record with that id; the update was dropped.
    Missing,
    /// The record exists but the lifecycle forbids the transition.
    Rejected { current: JobStatus },
}

/// Concurrency-safe job store.
///
/// Records live in a sharded map, so every operation locks only the shard
/// that holds the key. Two jobs never contend unless they hash to the same
/// shard, and even then only for the duration of a single field copy.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, JobRecord>,
    max_jobs: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    /// The capacity is a soft limit: concurrent inserts may overshoot it by
    /// the number of racing callers.
    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            max_jobs,
        }
    }

    /// Insert a new record. Fails if the registry is full or the id exists.
    pub fn put(&self, record: JobRecord) -> Result<()> {
        if self.is_full() {
            return Err(ProcessorError::RegistryFull);
        }
        match self.jobs.entry(record.id) {
            Entry::Occupied(_) => Err(ProcessorError::DuplicateJob(record.id)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Copy of the record as of this instant.
    pub fn get(&self, id: &Uuid) -> Result<JobRecord> {
        self.jobs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(ProcessorError::JobNotFound(*id))
    }

    /// Apply a status transition with its fields atomically.
    ///
    /// Unknown ids are tolerated because a job may be deleted while its
    /// executor is still reporting.
    pub fn update(&self, id: &Uuid, update: JobUpdate) -> UpdateOutcome {
        let Some(mut entry) = self.jobs.get_mut(id) else {
            return UpdateOutcome::Missing;
        };
        let current = entry.status;
        if entry.try_apply(update) {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Rejected { current }
        }
    }

    /// Apply `update` only if the record is currently in `expected`.
    ///
    /// This is the compare-and-set used to claim a job for submission: of two
    /// racing callers exactly one observes `expected`.
    pub fn transition(
        &self,
        id: &Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<JobRecord> {
        self.modify(id, |record| {
            if record.status != expected || !record.try_apply(update) {
                return Err(ProcessorError::InvalidState {
                    job_id: record.id,
                    status: record.status,
                    expected,
                });
            }
            Ok(record.clone())
        })?
    }

    /// Run `f` against the record while holding its entry lock.
    pub(crate) fn modify<R>(&self, id: &Uuid, f: impl FnOnce(&mut JobRecord) -> R) -> Result<R> {
        let mut entry = self
            .jobs
            .get_mut(id)
            .ok_or(ProcessorError::JobNotFound(*id))?;
        Ok(f(entry.value_mut()))
    }

    /// Remove a record, returning it.
    pub fn delete(&self, id: &Uuid) -> Result<JobRecord> {
        self.jobs
            .remove(id)
            .map(|(_, record)| record)
            .ok_or(ProcessorError::JobNotFound(*id))
    }

    pub fn list_ids(&self) -> Vec<Uuid> {
        self.jobs.iter().map(|entry| *entry.key()).collect()
    }

    /// All records sorted chronologically by creation time.
    pub fn all_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.timestamp);
        jobs
    }

    /// Records created strictly before `cutoff`.
    pub fn expired_before(&self, cutoff: DateTime<Utc>) -> Vec<JobRecord> {
        self.jobs
            .iter()
            .filter(|entry| entry.timestamp < cutoff)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
