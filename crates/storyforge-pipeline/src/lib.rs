//! Generation pipeline for storyforge.
//!
//! Three stages run in a fixed order per job: narrative synthesis,
//! illustration synthesis, document assembly. The [`Coordinator`] owns the
//! dispatch loop; each stage reads its input from and writes its output to
//! the artifact store, which is what makes `resume` idempotent. Status
//! changes are persisted through the job store and mirrored, best-effort,
//! onto the [`StatusPublisher`] broadcast channel.

mod assembly;
mod coordinator;
mod events;
mod illustration;
mod narrative;

pub use coordinator::{Coordinator, ResumeOutcome};
pub use events::{StatusEvent, StatusPublisher};
