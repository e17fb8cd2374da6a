//! Filesystem persistence for storyforge.
//!
//! Everything the pipeline needs to survive a process kill lives here: job
//! records (the authoritative status store), image/document blobs keyed by
//! `(job_id, artifact_kind, index)`, and per-artifact metadata records. All
//! writes are atomic (temp file + fsync + rename), so readers never observe
//! a half-written record; resumption decisions are derived solely from what
//! this crate reports as present.

mod artifacts;
mod atomic;
mod jobs;
mod paths;

pub use artifacts::ArtifactStore;
pub use atomic::{write_bytes_atomic, write_json_atomic};
pub use jobs::JobStore;
pub use paths::StorePaths;
