//! Job record store: the authoritative status source.
//!
//! Every status write goes through [`JobStore::update_status`], which
//! enforces the allowed-transition table. Writes are read-modify-write with
//! an atomic rename; mutating callers additionally hold the per-job lock,
//! so concurrent resumes cannot interleave updates.

use chrono::Utc;
use std::fs;
use tracing::debug;

use storyforge_types::{JobId, JobRecord, JobStatus, StoreError};

use crate::atomic::write_json_atomic;
use crate::paths::StorePaths;

/// Store for [`JobRecord`] rows, one JSON file per job.
#[derive(Debug, Clone)]
pub struct JobStore {
    paths: StorePaths,
}

impl JobStore {
    #[must_use]
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// Persist a fresh record; exactly one per user request.
    ///
    /// # Errors
    /// `StoreError::JobExists` if a record for this id is already present.
    pub fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let path = self.paths.job_record(&record.job_id);
        if path.exists() {
            return Err(StoreError::JobExists {
                job_id: record.job_id.to_string(),
            });
        }
        write_json_atomic(&path, record)
    }

    /// # Errors
    /// `StoreError::JobNotFound` if no record exists, `Corrupt` if it does
    /// not parse.
    pub fn load(&self, job_id: &JobId) -> Result<JobRecord, StoreError> {
        let path = self.paths.job_record(job_id);
        let content = fs::read_to_string(&path).map_err(|_| StoreError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// All job records, unordered. Unreadable entries are skipped with a
    /// log line rather than failing the whole scan.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the jobs directory cannot be read.
    pub fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let dir = self.paths.jobs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let Ok(job_id) = name.parse::<JobId>() else {
                continue;
            };
            match self.load(&job_id) {
                Ok(record) => records.push(record),
                Err(e) => debug!(job_id = %job_id, error = %e, "skipping unreadable job record"),
            }
        }
        Ok(records)
    }

    /// Read-modify-write of a job record under an atomic rename.
    ///
    /// `updated_at` is bumped on every call. Callers that change status must
    /// use [`JobStore::update_status`] instead so the transition table is
    /// enforced.
    ///
    /// # Errors
    /// Propagates load/store failures and whatever `mutate` returns.
    pub fn update<F>(&self, job_id: &JobId, mutate: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), StoreError>,
    {
        let mut record = self.load(job_id)?;
        mutate(&mut record)?;
        record.updated_at = Utc::now();
        write_json_atomic(&self.paths.job_record(job_id), &record)?;
        Ok(record)
    }

    /// Transition a job's status, validating against the state machine.
    ///
    /// Bookkeeping: `started_at` is set on the first move out of `Draft`,
    /// `completed_at` when reaching `Complete`, and `error` is cleared on
    /// any non-failed transition.
    ///
    /// # Errors
    /// `StoreError::InvalidTransition` when the table forbids the move.
    pub fn update_status(
        &self,
        job_id: &JobId,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<JobRecord, StoreError> {
        self.update(job_id, |record| {
            if !record.status.can_transition(to) {
                return Err(StoreError::InvalidTransition {
                    from: record.status.to_string(),
                    to: to.to_string(),
                });
            }

            let now = Utc::now();
            if record.status == JobStatus::Draft {
                record.started_at = Some(now);
            }
            match to {
                JobStatus::Complete => {
                    record.completed_at = Some(now);
                    record.error = None;
                }
                JobStatus::Failed => {
                    record.attempts += 1;
                    record.error = error.clone();
                }
                _ => record.error = None,
            }
            record.status = to;
            Ok(())
        })
    }
}
