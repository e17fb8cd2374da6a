//! Path layout for the storage root.
//!
//! ```text
//! <root>/jobs/<job_id>/job.json
//! <root>/jobs/<job_id>/job.lock
//! <root>/jobs/<job_id>/narrative.json
//! <root>/jobs/<job_id>/illustrations/<index>.png
//! <root>/jobs/<job_id>/illustrations/<index>.json
//! <root>/jobs/<job_id>/document.json
//! <root>/jobs/<job_id>/book.html
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use storyforge_types::JobId;

/// Resolves every persisted path from the configured storage root.
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: Utf8PathBuf,
}

impl StorePaths {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn jobs_dir(&self) -> Utf8PathBuf {
        self.root.join("jobs")
    }

    #[must_use]
    pub fn job_dir(&self, job_id: &JobId) -> Utf8PathBuf {
        self.jobs_dir().join(job_id.as_str())
    }

    #[must_use]
    pub fn job_record(&self, job_id: &JobId) -> Utf8PathBuf {
        self.job_dir(job_id).join("job.json")
    }

    #[must_use]
    pub fn job_lock(&self, job_id: &JobId) -> Utf8PathBuf {
        self.job_dir(job_id).join("job.lock")
    }

    #[must_use]
    pub fn narrative(&self, job_id: &JobId) -> Utf8PathBuf {
        self.job_dir(job_id).join("narrative.json")
    }

    #[must_use]
    pub fn illustrations_dir(&self, job_id: &JobId) -> Utf8PathBuf {
        self.job_dir(job_id).join("illustrations")
    }

    #[must_use]
    pub fn illustration_blob(&self, job_id: &JobId, index: u32) -> Utf8PathBuf {
        self.illustrations_dir(job_id).join(format!("{index:03}.png"))
    }

    #[must_use]
    pub fn illustration_record(&self, job_id: &JobId, index: u32) -> Utf8PathBuf {
        self.illustrations_dir(job_id).join(format!("{index:03}.json"))
    }

    #[must_use]
    pub fn document_record(&self, job_id: &JobId) -> Utf8PathBuf {
        self.job_dir(job_id).join("document.json")
    }

    #[must_use]
    pub fn document_blob(&self, job_id: &JobId) -> Utf8PathBuf {
        self.job_dir(job_id).join("book.html")
    }
}
