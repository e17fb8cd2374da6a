//! Job admission, concurrency capping and retry policy.
//!
//! Two ways into the pipeline: a direct [`Scheduler::trigger`] for a known
//! job, and the periodic [`Scheduler::sweep_once`] that picks up whatever a
//! crash or transient failure left behind, oldest job first. Both paths go
//! through one semaphore so the global concurrency cap holds regardless of
//! who asked. Retries are whole-job: a failed job re-enters through the
//! coordinator after an exponential backoff, until its attempt budget is
//! spent.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use storyforge_config::SchedulerConfig;
use storyforge_pipeline::{Coordinator, ResumeOutcome};
use storyforge_types::{JobId, JobRecord, JobStatus, SchedulerError, StoryforgeError};

/// Admission front door for the pipeline coordinator.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs as usize));
        Self {
            coordinator,
            config,
            permits,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Admit one specific job, waiting for a concurrency permit if the cap
    /// is reached.
    ///
    /// # Errors
    /// `SchedulerError::NotPaid` for an unpaid job and
    /// `SchedulerError::RetryBudgetExhausted` once the attempt budget is
    /// spent, plus anything the resume itself returns.
    pub async fn trigger(&self, job_id: &JobId) -> Result<ResumeOutcome, StoryforgeError> {
        let record = self.coordinator.jobs().load(job_id)?;
        if !record.paid {
            return Err(SchedulerError::NotPaid.into());
        }
        if self.budget_exhausted(&record) {
            return Err(SchedulerError::RetryBudgetExhausted {
                attempts: record.attempts,
            }
            .into());
        }
        self.admit(job_id).await
    }

    /// One sweep pass: find every job that needs attention, resume the
    /// oldest eligible one. Returns what was resumed, if anything.
    ///
    /// Deliberately one job per pass; in-flight work keeps its permits and
    /// the next pass picks up the rest.
    ///
    /// # Errors
    /// Store errors from scanning; resume outcomes (including failures) are
    /// returned, not raised.
    pub async fn sweep_once(&self) -> Result<Option<(JobId, ResumeOutcome)>, StoryforgeError> {
        let now = Utc::now();
        let mut candidates: Vec<JobRecord> = self
            .coordinator
            .jobs()
            .list()?
            .into_iter()
            .filter(|record| self.is_sweep_eligible(record, now))
            .collect();
        candidates.sort_by_key(|record| record.created_at);

        let Some(oldest) = candidates.first() else {
            debug!("sweep found nothing to do");
            return Ok(None);
        };

        info!(
            job_id = %oldest.job_id,
            status = %oldest.status,
            attempts = oldest.attempts,
            waiting = candidates.len(),
            "sweep resuming oldest eligible job"
        );
        let job_id = oldest.job_id.clone();
        let outcome = self.admit(&job_id).await?;
        Ok(Some((job_id, outcome)))
    }

    /// Run sweeps forever at the configured interval. Errors are logged and
    /// do not stop the loop.
    pub async fn run(&self) -> ! {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.sweep_once().await {
                Ok(Some((job_id, outcome))) => {
                    debug!(job_id = %job_id, ?outcome, "sweep pass finished");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "sweep pass failed"),
            }
        }
    }

    async fn admit(&self, job_id: &JobId) -> Result<ResumeOutcome, StoryforgeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SchedulerError::Shutdown)?;

        let outcome = self.coordinator.resume(job_id).await?;
        if let ResumeOutcome::Failed { message } = &outcome {
            warn!(job_id = %job_id, error = %message, "admitted job failed");
        }
        Ok(outcome)
    }

    fn budget_exhausted(&self, record: &JobRecord) -> bool {
        record.status == JobStatus::Failed && record.attempts >= self.config.max_attempts
    }

    /// Paid, resumable, within budget, and past its backoff window.
    fn is_sweep_eligible(&self, record: &JobRecord, now: DateTime<Utc>) -> bool {
        if !record.paid || !record.status.is_resumable() {
            return false;
        }
        if self.budget_exhausted(record) {
            return false;
        }
        if record.status == JobStatus::Failed {
            let delay = backoff_delay(
                record.attempts,
                self.config.backoff_base_secs,
                self.config.backoff_cap_secs,
            );
            let Some(delay) = TimeDelta::from_std(delay).ok() else {
                return false;
            };
            return record.updated_at + delay <= now;
        }
        true
    }
}

/// Exponential backoff for the nth failed attempt, capped.
fn backoff_delay(attempts: u32, base_secs: u64, cap_secs: u64) -> Duration {
    let exp = attempts.saturating_sub(1).min(32);
    let secs = base_secs
        .checked_shl(exp)
        .unwrap_or(cap_secs)
        .min(cap_secs);
    Duration::from_secs(secs)
}
