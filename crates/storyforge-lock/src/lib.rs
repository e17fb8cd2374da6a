//! Per-job file locking with advisory semantics and crash recovery
//!
//! Each generation job gets an exclusive advisory lock on its job directory
//! so that two concurrent `resume` calls never run the expensive stages
//! twice. The lock coordinates storyforge processes but is not a security
//! boundary. Because the underlying OS lock is released automatically when
//! the holding process dies, a crashed run never leaves a job stuck: the
//! next acquisition succeeds and only the JSON info payload is stale.

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

/// Age threshold after which a lock info payload is reported as stale.
///
/// The OS releases the advisory lock on process death, so this only affects
/// how a contended lock is described in error messages.
const STALE_THRESHOLD_SECS: u64 = 3600;

/// Information written into the lock file by the holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID that created the lock
    pub pid: u32,
    /// Timestamp when the lock was created (seconds since UNIX epoch)
    pub created_at: u64,
    /// Job ID being locked
    pub job_id: String,
    /// storyforge version that created the lock
    pub version: String,
}

impl LockInfo {
    fn for_current_process(job_id: &str) -> Self {
        Self {
            pid: process::id(),
            created_at: unix_now(),
            job_id: job_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Age of the lock in seconds.
    #[must_use]
    pub fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.created_at)
    }

    /// Whether the payload is old enough that the writer is probably gone.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.age_secs() > STALE_THRESHOLD_SECS
    }
}

/// Lock errors for per-job locking operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Job '{job_id}' is already being processed (PID {pid}, lock created {created_ago} ago)")]
    Held {
        job_id: String,
        pid: u32,
        created_ago: String,
    },

    #[error("Lock file is corrupted or invalid: {reason}")]
    Corrupted { reason: String },

    #[error("Failed to acquire lock: {reason}")]
    AcquisitionFailed { reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive advisory lock for one job directory.
///
/// Acquire with [`JobLock::try_acquire`]; the returned guard releases the
/// lock when dropped. Contention is not an error: a held lock yields
/// `Ok(None)` so callers can report "busy" and move on.
pub struct JobLock {
    path: Utf8PathBuf,
    job_id: String,
    lock: RwLock<File>,
}

/// Guard holding the OS-level lock; dropping it releases the lock.
pub struct JobLockGuard<'a> {
    _guard: RwLockWriteGuard<'a, File>,
}

impl JobLock {
    /// Open (creating if necessary) the lock file for a job.
    ///
    /// # Errors
    /// Returns `LockError::Io` if the lock file or its parent directory
    /// cannot be created.
    pub fn open(path: impl AsRef<Utf8Path>, job_id: &str) -> Result<Self, LockError> {
        let path = path.as_ref().to_owned();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            path,
            job_id: job_id.to_string(),
            lock: RwLock::new(file),
        })
    }

    /// Try to acquire the exclusive lock without blocking.
    ///
    /// Returns `Ok(None)` when another process (or another handle in this
    /// process) currently holds the lock. On success the holder's
    /// [`LockInfo`] is written into the file for diagnostics.
    ///
    /// # Errors
    /// Returns `LockError` for IO failures other than contention.
    pub fn try_acquire(&mut self) -> Result<Option<JobLockGuard<'_>>, LockError> {
        let info = LockInfo::for_current_process(&self.job_id);

        match self.lock.try_write() {
            Ok(mut guard) => {
                let payload = serde_json::to_string_pretty(&info).map_err(|e| {
                    LockError::AcquisitionFailed {
                        reason: format!("failed to serialize lock info: {e}"),
                    }
                })?;

                guard.set_len(0)?;
                guard.seek(SeekFrom::Start(0))?;
                guard.write_all(payload.as_bytes())?;
                guard.sync_all()?;

                Ok(Some(JobLockGuard { _guard: guard }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    /// Describe the current holder, if the lock is contended.
    ///
    /// Reads the info payload left by the holder. Returns `Ok(None)` when
    /// the file is empty (never locked, or holder crashed before writing).
    ///
    /// # Errors
    /// Returns `LockError::Corrupted` if the payload does not parse.
    pub fn holder(&self) -> Result<Option<LockInfo>, LockError> {
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        let info: LockInfo =
            serde_json::from_str(&content).map_err(|e| LockError::Corrupted {
                reason: format!("invalid lock info in {}: {e}", self.path),
            })?;
        Ok(Some(info))
    }

    /// Build the `Held` error for a contended lock, for callers that want to
    /// fail loudly instead of returning busy.
    #[must_use]
    pub fn held_error(&self) -> LockError {
        match self.holder() {
            Ok(Some(info)) => LockError::Held {
                job_id: self.job_id.clone(),
                pid: info.pid,
                created_ago: format_age(info.age_secs()),
            },
            _ => LockError::AcquisitionFailed {
                reason: format!("lock for job '{}' is held by an unknown process", self.job_id),
            },
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Format an age in seconds as a short human-readable string.
fn format_age(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("job.lock")).unwrap()
    }

    #[test]
    fn acquire_writes_holder_info() {
        let dir = TempDir::new().unwrap();
        let mut lock = JobLock::open(lock_path(&dir), "job-1").unwrap();

        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_some());
        drop(guard);

        let info = lock.holder().unwrap().unwrap();
        assert_eq!(info.job_id, "job-1");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.is_stale());
    }

    #[test]
    fn second_handle_sees_contention() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let mut first = JobLock::open(&path, "job-1").unwrap();
        let _guard = first.try_acquire().unwrap().unwrap();

        let mut second = JobLock::open(&path, "job-1").unwrap();
        assert!(second.try_acquire().unwrap().is_none());

        let err = second.held_error();
        assert!(matches!(err, LockError::Held { .. }));
    }

    #[test]
    fn lock_released_on_guard_drop() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);

        let mut first = JobLock::open(&path, "job-1").unwrap();
        let guard = first.try_acquire().unwrap().unwrap();
        drop(guard);

        let mut second = JobLock::open(&path, "job-1").unwrap();
        assert!(second.try_acquire().unwrap().is_some());
    }

    #[test]
    fn holder_on_fresh_file_is_none() {
        let dir = TempDir::new().unwrap();
        let lock = JobLock::open(lock_path(&dir), "job-1").unwrap();
        assert!(lock.holder().unwrap().is_none());
    }

    #[test]
    fn format_age_buckets() {
        assert_eq!(format_age(12), "12s");
        assert_eq!(format_age(130), "2m");
        assert_eq!(format_age(7500), "2h5m");
    }
}
