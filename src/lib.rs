//! storyforge: a resumable generation pipeline for personalized
//! illustrated storybooks.
//!
//! A job goes in as a validated [`JobConfig`] and comes out as a
//! self-contained HTML book. Everything in between is crash-safe: each
//! stage persists its output before the job record advances, and
//! [`Storyforge::resume`] re-derives the next step from what is on disk.
//!
//! This crate is the facade: job submission, payment confirmation, status
//! queries and the scheduler entry points, plus the CLI. The actual work
//! lives in the `storyforge-*` member crates.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use storyforge_pipeline::Coordinator;

pub use storyforge_config::Config;
pub use storyforge_pipeline::{ResumeOutcome, StatusEvent, StatusPublisher};
pub use storyforge_providers::{ImageProvider, TextProvider};
pub use storyforge_scheduler::Scheduler;
pub use storyforge_types::{
    ChildDescriptor, JobConfig, JobId, JobRecord, JobStatus, PetDescriptor, StorySource,
    StoryforgeError,
};

pub mod cli;

/// Handle to one storage root: submission, payment, status and resume.
pub struct Storyforge {
    coordinator: Arc<Coordinator>,
    scheduler: Scheduler,
}

impl Storyforge {
    /// Open with the HTTP-backed providers named in the configuration.
    ///
    /// # Errors
    /// Provider misconfiguration, typically a missing API key env var.
    pub fn open(config: Config) -> Result<Self, StoryforgeError> {
        let text = storyforge_providers::text_provider_from_config(&config)?;
        let image = storyforge_providers::image_provider_from_config(&config)?;
        Ok(Self::with_providers(config, text, image))
    }

    /// Open with explicit provider implementations. This is the seam tests
    /// and embedders use to avoid the network.
    #[must_use]
    pub fn with_providers(
        config: Config,
        text: Arc<dyn TextProvider>,
        image: Arc<dyn ImageProvider>,
    ) -> Self {
        let scheduler_config = config.scheduler.clone();
        let coordinator = Arc::new(Coordinator::new(config, text, image));
        let scheduler = Scheduler::new(Arc::clone(&coordinator), scheduler_config);
        Self {
            coordinator,
            scheduler,
        }
    }

    /// Validate and persist a new draft job. Nothing runs until payment is
    /// confirmed.
    ///
    /// # Errors
    /// `ValidationError` for bad parameters, store errors on persistence.
    pub fn submit(&self, config: JobConfig) -> Result<JobId, StoryforgeError> {
        config.validate()?;
        let record = JobRecord::new(JobId::new(), config);
        self.coordinator.jobs().create(&record)?;
        info!(job_id = %record.job_id, pages = record.config.page_count, "job submitted");
        Ok(record.job_id)
    }

    /// Mark a job as paid and move it out of `Draft`. Idempotent: calling
    /// again on a paid job changes nothing. The record write happens under
    /// the per-job lock.
    ///
    /// # Errors
    /// `StoreError::JobNotFound` for an unknown id, `LockError::Held` when
    /// a resume currently holds the job lock.
    pub fn confirm_payment(&self, job_id: &JobId) -> Result<JobRecord, StoryforgeError> {
        self.coordinator.confirm_payment(job_id)
    }

    /// The persisted record for a job: status, error, timestamps, attempts.
    /// This is the pollable source of truth behind the event stream.
    ///
    /// # Errors
    /// `StoreError::JobNotFound` for an unknown id.
    pub fn get_status(&self, job_id: &JobId) -> Result<JobRecord, StoryforgeError> {
        Ok(self.coordinator.jobs().load(job_id)?)
    }

    /// Subscribe to best-effort status change events. Anything missed can
    /// be recovered by polling [`Storyforge::get_status`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.coordinator.publisher().subscribe()
    }

    /// Drive one job forward through the scheduler's admission gate.
    ///
    /// # Errors
    /// Scheduler admission errors (unpaid, retry budget spent) and anything
    /// the resume itself raises.
    pub async fn resume(&self, job_id: &JobId) -> Result<ResumeOutcome, StoryforgeError> {
        self.scheduler.trigger(job_id).await
    }

    /// One sweep pass over the job store.
    ///
    /// # Errors
    /// Store errors from scanning.
    pub async fn sweep_once(&self) -> Result<Option<(JobId, ResumeOutcome)>, StoryforgeError> {
        self.scheduler.sweep_once().await
    }

    /// Run the sweep loop until the process is stopped.
    pub async fn run(&self) -> ! {
        self.scheduler.run().await
    }

    #[must_use]
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use storyforge_providers::{ImageSeed, ImageSession, TextRequest, TextResult};
    use storyforge_types::ProviderError;
    use tempfile::TempDir;

    struct NoText;

    #[async_trait]
    impl TextProvider for NoText {
        async fn generate(&self, _r: TextRequest) -> Result<TextResult, ProviderError> {
            Err(ProviderError::Misconfiguration("not wired in tests".into()))
        }
    }

    struct NoImages;

    #[async_trait]
    impl ImageProvider for NoImages {
        async fn open_session(
            &self,
            _seed: ImageSeed,
        ) -> Result<Box<dyn ImageSession>, ProviderError> {
            Err(ProviderError::Misconfiguration("not wired in tests".into()))
        }
    }

    fn storyforge(dir: &TempDir) -> Storyforge {
        let mut config = Config::default();
        config.storage.root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Storyforge::with_providers(config, Arc::new(NoText), Arc::new(NoImages))
    }

    fn job_config() -> JobConfig {
        JobConfig {
            child: ChildDescriptor {
                name: "Mara".into(),
                age: 6,
                appearance: String::new(),
            },
            pet: None,
            interests: vec![],
            traits: vec![],
            style: "watercolor".into(),
            story: StorySource::Template { id: "space".into() },
            page_count: 5,
            reference_photo: None,
        }
    }

    #[tokio::test]
    async fn submit_persists_an_unpaid_draft() {
        let dir = TempDir::new().unwrap();
        let sf = storyforge(&dir);

        let job_id = sf.submit(job_config()).unwrap();
        let record = sf.get_status(&job_id).unwrap();
        assert_eq!(record.status, JobStatus::Draft);
        assert!(!record.paid);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let sf = storyforge(&dir);

        let mut bad = job_config();
        bad.page_count = 0;
        assert!(matches!(sf.submit(bad), Err(StoryforgeError::Validation(_))));
    }

    #[tokio::test]
    async fn confirm_payment_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let sf = storyforge(&dir);
        let job_id = sf.submit(job_config()).unwrap();

        let first = sf.confirm_payment(&job_id).unwrap();
        assert!(first.paid);
        assert_eq!(first.status, JobStatus::Processing);

        let second = sf.confirm_payment(&job_id).unwrap();
        assert_eq!(second.status, JobStatus::Processing);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn resume_before_payment_is_refused() {
        let dir = TempDir::new().unwrap();
        let sf = storyforge(&dir);
        let job_id = sf.submit(job_config()).unwrap();

        assert!(matches!(
            sf.resume(&job_id).await,
            Err(StoryforgeError::Scheduler(_))
        ));
    }
}
