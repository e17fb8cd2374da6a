//! Pipeline coordinator: lock, derive, dispatch.
//!
//! `resume` is the single entry point for making progress on a job, safe to
//! call any number of times. Which stage runs next is derived from artifact
//! presence on disk, never from the status field or in-memory state, so a
//! crash between an artifact write and its status write costs nothing: the
//! next resume re-derives and moves on. The per-job advisory lock keeps two
//! resumes from paying for the same generation twice.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use storyforge_config::Config;
use storyforge_lock::JobLock;
use storyforge_providers::{ImageProvider, TextProvider};
use storyforge_store::{ArtifactStore, JobStore, StorePaths};
use storyforge_types::{
    JobConfig, JobId, JobRecord, JobStatus, Narrative, StoreError, StoryforgeError,
};

use crate::events::StatusPublisher;
use crate::{assembly, illustration, narrative};

/// What a `resume` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Every remaining stage ran; the job is complete.
    Completed,
    /// Another resume holds the job lock; nothing was done.
    Busy,
    /// Payment is not confirmed; nothing was dispatched.
    NotPaid,
    /// The job was already in a terminal state; resuming is a no-op.
    Terminal(JobStatus),
    /// A stage failed; the failure is persisted on the record and the job
    /// is eligible for a later retry.
    Failed { message: String },
}

/// The three generation stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Narrative,
    Illustration,
    Assembly,
}

/// Owns the stores, providers and status publisher for one storage root.
pub struct Coordinator {
    config: Config,
    text_timeout: Duration,
    paths: StorePaths,
    jobs: JobStore,
    artifacts: ArtifactStore,
    text: Arc<dyn TextProvider>,
    image: Arc<dyn ImageProvider>,
    publisher: StatusPublisher,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        config: Config,
        text: Arc<dyn TextProvider>,
        image: Arc<dyn ImageProvider>,
    ) -> Self {
        let paths = StorePaths::new(config.storage.root.clone());
        Self {
            text_timeout: Duration::from_secs(config.text_provider.timeout_secs),
            jobs: JobStore::new(paths.clone()),
            artifacts: ArtifactStore::new(paths.clone()),
            paths,
            config,
            text,
            image,
            publisher: StatusPublisher::new(),
        }
    }

    #[must_use]
    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    #[must_use]
    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    /// Drive a job forward through every remaining stage.
    ///
    /// Idempotent: completed stages are detected from their persisted
    /// artifacts and skipped. A held lock, an unpaid job and a terminal job
    /// are reported as outcomes, not errors; stage failures are persisted
    /// as a failed status and likewise reported as an outcome.
    ///
    /// # Errors
    /// Store, lock and config errors that prevented the resume from running
    /// at all. Stage failures do not surface here.
    pub async fn resume(&self, job_id: &JobId) -> Result<ResumeOutcome, StoryforgeError> {
        let record = self.jobs.load(job_id)?;
        if record.status.is_terminal() {
            debug!(job_id = %job_id, status = %record.status, "resume on terminal job is a no-op");
            return Ok(ResumeOutcome::Terminal(record.status));
        }
        if !record.paid {
            debug!(job_id = %job_id, "resume refused, payment not confirmed");
            return Ok(ResumeOutcome::NotPaid);
        }

        let mut lock = JobLock::open(self.paths.job_lock(job_id), job_id.as_str())?;
        let Some(_guard) = lock.try_acquire()? else {
            debug!(job_id = %job_id, holder = ?lock.holder(), "job lock held, reporting busy");
            return Ok(ResumeOutcome::Busy);
        };

        // Re-read under the lock; the previous holder may have advanced or
        // finished the job while we waited to observe the lock.
        let record = self.jobs.load(job_id)?;
        if record.status.is_terminal() {
            return Ok(ResumeOutcome::Terminal(record.status));
        }
        if record.status == JobStatus::Draft {
            self.transition(job_id, JobStatus::Processing)?;
        }

        info!(job_id = %job_id, status = %record.status, attempts = record.attempts, "resuming job");

        match self.run_stages(job_id, &record.config).await {
            Ok(()) => {
                // The stage loop only exits cleanly once every artifact is
                // present, which is exactly the completion condition.
                self.transition(job_id, JobStatus::Assembling)?;
                self.transition(job_id, JobStatus::Complete)?;
                info!(job_id = %job_id, "job complete");
                Ok(ResumeOutcome::Completed)
            }
            Err(e) => {
                let message = e.to_string();
                let failed =
                    self.jobs
                        .update_status(job_id, JobStatus::Failed, Some(message.clone()))?;
                // Annotate a spent retry budget while the job lock is still
                // held.
                let message = if failed.attempts >= self.config.scheduler.max_attempts {
                    let spent =
                        format!("giving up after {} attempts: {message}", failed.attempts);
                    self.jobs.update(job_id, |record| {
                        record.error = Some(spent.clone());
                        Ok(())
                    })?;
                    spent
                } else {
                    message
                };
                self.publisher
                    .publish(job_id, JobStatus::Failed, Some(message.clone()));
                warn!(job_id = %job_id, attempts = failed.attempts, error = %message, "job failed");
                Ok(ResumeOutcome::Failed { message })
            }
        }
    }

    /// Flip the payment gate and move a draft job into line. Idempotent:
    /// calling again on a paid job changes nothing.
    ///
    /// The record write happens under the per-job lock so it cannot
    /// interleave with a resume running in another process.
    ///
    /// # Errors
    /// `StoreError::JobNotFound` for an unknown id, `LockError::Held` when
    /// a resume currently holds the job lock.
    pub fn confirm_payment(&self, job_id: &JobId) -> Result<JobRecord, StoryforgeError> {
        let record = self.jobs.load(job_id)?;
        if record.paid {
            return Ok(record);
        }

        let mut lock = JobLock::open(self.paths.job_lock(job_id), job_id.as_str())?;
        let Some(_guard) = lock.try_acquire()? else {
            return Err(lock.held_error().into());
        };

        // Re-read under the lock; a concurrent confirmation may have won.
        let record = self.jobs.load(job_id)?;
        if record.paid {
            return Ok(record);
        }
        self.jobs.update(job_id, |r| {
            r.paid = true;
            Ok(())
        })?;
        let updated = if record.status == JobStatus::Draft {
            self.jobs.update_status(job_id, JobStatus::Processing, None)?
        } else {
            self.jobs.load(job_id)?
        };
        self.publisher.publish(job_id, updated.status, None);
        info!(job_id = %job_id, "payment confirmed");
        Ok(updated)
    }

    async fn run_stages(&self, job_id: &JobId, config: &JobConfig) -> Result<(), StoryforgeError> {
        while let Some(stage) = self.next_stage(job_id, config)? {
            debug!(job_id = %job_id, ?stage, "dispatching stage");
            match stage {
                Stage::Narrative => {
                    self.transition(job_id, JobStatus::NarrativePending)?;
                    narrative::run(
                        self.text.as_ref(),
                        &self.artifacts,
                        &self.config.pipeline,
                        self.text_timeout,
                        job_id,
                        config,
                    )
                    .await?;
                }
                Stage::Illustration => {
                    self.transition(job_id, JobStatus::Illustrating)?;
                    let narrative = self.load_narrative(job_id)?;
                    illustration::run(
                        self.image.as_ref(),
                        &self.artifacts,
                        &self.config.pipeline,
                        job_id,
                        config,
                        &narrative,
                    )
                    .await?;
                }
                Stage::Assembly => {
                    self.transition(job_id, JobStatus::Assembling)?;
                    let narrative = self.load_narrative(job_id)?;
                    assembly::run(&self.artifacts, job_id, config, &narrative)?;
                }
            }
        }
        Ok(())
    }

    /// First stage whose output is missing, derived purely from disk.
    fn next_stage(
        &self,
        job_id: &JobId,
        config: &JobConfig,
    ) -> Result<Option<Stage>, StoryforgeError> {
        if !self.artifacts.narrative_exists(job_id) {
            return Ok(Some(Stage::Narrative));
        }
        let have = self.artifacts.illustration_indices(job_id)?.len() as u32;
        if have < config.illustration_count() {
            return Ok(Some(Stage::Illustration));
        }
        if !self.artifacts.document_exists(job_id) {
            return Ok(Some(Stage::Assembly));
        }
        Ok(None)
    }

    fn load_narrative(&self, job_id: &JobId) -> Result<Narrative, StoryforgeError> {
        Ok(self
            .artifacts
            .read_narrative(job_id)?
            .ok_or_else(|| StoreError::ArtifactNotFound {
                what: format!("narrative for job {job_id}"),
            })?)
    }

    /// Move the job to `to` unless it is already there, publishing the
    /// change. Skipping the no-op keeps replayed dispatches out of the
    /// transition table's way.
    fn transition(&self, job_id: &JobId, to: JobStatus) -> Result<(), StoryforgeError> {
        let current = self.jobs.load(job_id)?.status;
        if current == to {
            return Ok(());
        }
        let updated = self.jobs.update_status(job_id, to, None)?;
        self.publisher.publish(job_id, to, updated.error.clone());
        Ok(())
    }
}
