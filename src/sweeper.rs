use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cleanup::remove_artifacts;
use crate::config::RetentionConfig;
use crate::error::ProcessorError;
use crate::registry::JobRegistry;

/// Totals for one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
    /// Expired jobs kept because an artifact could not be removed.
    pub retained: usize,
    pub artifact_failures: usize,
}

/// Periodically purges jobs older than the retention age.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    registry: Arc<JobRegistry>,
    max_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<JobRegistry>, config: &RetentionConfig) -> Self {
        Self {
            registry,
            max_age: config.max_age,
            interval: config.sweep_interval,
        }
    }

    /// Run sweep cycles until `shutdown` is cancelled.
    ///
    /// The token is only checked between cycles; a cycle in progress always
    /// runs to completion. Each cycle runs as its own task so a panic inside
    /// one is logged and the loop carries on.
    pub async fn run(self, shutdown: CancellationToken) {
        self.run_cycles(shutdown, |sweeper| async move {
            sweeper.sweep_once().await
        })
        .await;
    }

    async fn run_cycles<F, Fut>(self, shutdown: CancellationToken, cycle: F)
    where
        F: Fn(RetentionSweeper) -> Fut,
        Fut: Future<Output = SweepReport> + Send + 'static,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            max_age = ?self.max_age,
            interval = ?self.interval,
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match tokio::spawn(cycle(self.clone())).await {
                Ok(report) if report.expired > 0 => {
                    tracing::info!(
                        expired = report.expired,
                        purged = report.purged,
                        retained = report.retained,
                        artifact_failures = report.artifact_failures,
                        "Retention sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Retention sweep cycle failed, retrying next interval");
                }
            }
        }

        tracing::info!("Retention sweeper stopped");
    }

    /// One cycle against the current time.
    pub async fn sweep_once(&self) -> SweepReport {
        match self.cutoff(Utc::now()) {
            Some(cutoff) => self.sweep_before(cutoff).await,
            None => SweepReport::default(),
        }
    }

    /// Purge every job created before `cutoff`.
    ///
    /// A job whose artifacts could not all be removed stays registered so the
    /// next cycle retries it.
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> SweepReport {
        let expired = self.registry.expired_before(cutoff);
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for record in expired {
            let cleanup = remove_artifacts(&record).await;
            if !cleanup.is_clean() {
                report.artifact_failures += cleanup.failed();
                report.retained += 1;
                tracing::warn!(
                    job_id = %record.id,
                    failed = cleanup.failed(),
                    "Expired job kept, artifacts will be retried next sweep"
                );
                continue;
            }

            match self.registry.delete(&record.id) {
                Ok(_) => report.purged += 1,
                Err(ProcessorError::JobNotFound(_)) => {
                    tracing::debug!(job_id = %record.id, "Job already deleted before sweep");
                }
                Err(e) => {
                    tracing::warn!(job_id = %record.id, error = %e, "Failed to purge job");
                }
            }
        }

        report
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let age = TimeDelta::from_std(self.max_age).ok()?;
        now.checked_sub_signed(age)
    }
}
