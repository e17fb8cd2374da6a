//! Shared data model for the storyforge generation pipeline
//!
//! This crate defines the persisted types (jobs, artifacts), the job status
//! state machine with its allowed-transition table, and the error taxonomy
//! used across the workspace. It contains no IO; persistence lives in
//! `storyforge-store`.

pub mod artifact;
pub mod error;
pub mod job;
pub mod status;

pub use artifact::{
    ArtifactKind, DocumentRecord, IllustrationRecord, Narrative, NarrativePage, PageRole,
};
pub use error::{
    ConfigError, ProviderError, SchedulerError, StageError, StoreError, StoryforgeError,
    ValidationError,
};
pub use job::{ChildDescriptor, JobConfig, JobId, JobRecord, PetDescriptor, StorySource};
pub use status::JobStatus;

// Re-exported so callers can match on lock failures through the umbrella error.
pub use storyforge_lock::LockError;
