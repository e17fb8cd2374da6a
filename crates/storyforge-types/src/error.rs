//! Error taxonomy for the generation pipeline.
//!
//! One enum per concern, rolled up into [`StoryforgeError`]. The taxonomy
//! follows retry semantics: validation errors are never retried, transient
//! provider errors are retried with backoff inside their stage, stage-fatal
//! errors bubble to the coordinator which persists a failed status and
//! leaves the whole job to the scheduler's retry budget.

use std::time::Duration;
use thiserror::Error;

pub use storyforge_lock::LockError;

/// Bad input. Rejected at submission or parse time, never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing or empty field: {field}")]
    MissingField { field: &'static str },

    #[error("Page count {got} out of range ({min}..={max})")]
    PageCountOutOfRange { got: u32, min: u32, max: u32 },

    #[error("Not a valid job id: '{raw}'")]
    BadJobId { raw: String },

    #[error("Narrative has invalid shape: {reason}")]
    NarrativeShape { reason: String },

    #[error("Reference photo not readable: {reason}")]
    ReferencePhoto { reason: String },
}

/// Failure talking to an external generation provider.
///
/// `is_retryable` distinguishes transient faults (retried with backoff,
/// bounded) from permanent ones (misconfiguration, auth) that fail fast.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider authentication error: {0}")]
    Auth(String),

    #[error("Provider quota exceeded: {0}")]
    Quota(String),

    #[error("Provider outage: {0}")]
    Outage(String),

    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),
}

impl ProviderError {
    /// Whether retrying the same request later can plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Quota(_) | Self::Outage(_) | Self::Timeout { .. }
        )
    }
}

/// Stage-fatal failures that bubble to the coordinator.
#[derive(Debug, Error)]
pub enum StageError {
    /// The narrative provider kept returning malformed output; the
    /// reformulation budget is spent.
    #[error("Narrative generation failed after {attempts} attempts: {last_error}")]
    NarrativeExhausted { attempts: u32, last_error: String },

    /// Mid-session illustration failure. The session is broken and cannot
    /// safely continue; `completed` of `total` indices are persisted and the
    /// next resume starts a fresh session at the first missing index.
    #[error(
        "Illustration session broke after {completed}/{total} images: {reason}"
    )]
    ConsistencyBreak {
        completed: u32,
        total: u32,
        reason: String,
    },

    /// Non-retryable provider failure surfaced directly.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Persistence failures from the job/artifact stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Job already exists: {job_id}")]
    JobExists { job_id: String },

    #[error("Artifact not found: {what}")]
    ArtifactNotFound { what: String },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Corrupt record at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scheduler/admission failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("Job is not payment-confirmed")]
    NotPaid,

    #[error("Scheduler is shut down")]
    Shutdown,
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Workspace-level umbrella error.
#[derive(Debug, Error)]
pub enum StoryforgeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
