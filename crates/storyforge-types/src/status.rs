//! Job status state machine
//!
//! One explicit enum plus one allowed-transition table, validated on every
//! status write by the job store. Entry points never compare status strings;
//! they go through [`JobStatus::can_transition`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a generation job.
///
/// The happy path advances monotonically:
/// `Draft → Processing → NarrativePending → Illustrating → Assembling → Complete`.
/// `Failed` is reachable from any of the four middle states and re-enters the
/// machine at the last completed stage on retry. `Cancelled` is an
/// externally-set terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobStatus {
    Draft,
    Processing,
    NarrativePending,
    Illustrating,
    Assembling,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Position in the forward progression; terminal/error states have none.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Draft => Some(0),
            Self::Processing => Some(1),
            Self::NarrativePending => Some(2),
            Self::Illustrating => Some(3),
            Self::Assembling => Some(4),
            Self::Complete => Some(5),
            Self::Failed | Self::Cancelled => None,
        }
    }

    /// Whether no further transitions are allowed without external action.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled)
    }

    /// The four middle states a running pipeline moves through.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Processing | Self::NarrativePending | Self::Illustrating | Self::Assembling
        )
    }

    /// Whether the sweep should consider this job for resumption.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        self.is_active() || self == Self::Failed
    }

    /// The allowed-transition table.
    ///
    /// Forward transitions may skip states (a resumed job jumps straight to
    /// its first incomplete stage) but never move backwards. `Complete` is
    /// only reachable from `Assembling`, after completeness verification.
    #[must_use]
    pub fn can_transition(self, to: JobStatus) -> bool {
        if self == to {
            return false;
        }

        match (self, to) {
            // Cancellation is allowed from any non-terminal state.
            (from, Self::Cancelled) => !from.is_terminal(),
            // Failure is only meaningful while the pipeline is running.
            (from, Self::Failed) => from.is_active(),
            // Retry re-enters at the last completed stage.
            (Self::Failed, to) => to.is_active(),
            (Self::Complete | Self::Cancelled, _) => false,
            (Self::Draft, to) => to == Self::Processing,
            (from, Self::Complete) => from == Self::Assembling,
            // Monotonic forward movement through the middle states.
            (from, to) => match (from.rank(), to.rank()) {
                (Some(f), Some(t)) => t > f,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn happy_path_transitions_allowed() {
        let path = [
            JobStatus::Draft,
            JobStatus::Processing,
            JobStatus::NarrativePending,
            JobStatus::Illustrating,
            JobStatus::Assembling,
            JobStatus::Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn resume_can_skip_completed_stages() {
        assert!(JobStatus::Processing.can_transition(JobStatus::Illustrating));
        assert!(JobStatus::Processing.can_transition(JobStatus::Assembling));
        assert!(JobStatus::NarrativePending.can_transition(JobStatus::Assembling));
    }

    #[test]
    fn no_backward_movement() {
        assert!(!JobStatus::Assembling.can_transition(JobStatus::Illustrating));
        assert!(!JobStatus::Illustrating.can_transition(JobStatus::Processing));
        assert!(!JobStatus::Processing.can_transition(JobStatus::Draft));
    }

    #[test]
    fn failed_only_from_active_states() {
        assert!(JobStatus::Processing.can_transition(JobStatus::Failed));
        assert!(JobStatus::Assembling.can_transition(JobStatus::Failed));
        assert!(!JobStatus::Draft.can_transition(JobStatus::Failed));
        assert!(!JobStatus::Complete.can_transition(JobStatus::Failed));
    }

    #[test]
    fn failed_reenters_at_any_stage() {
        assert!(JobStatus::Failed.can_transition(JobStatus::NarrativePending));
        assert!(JobStatus::Failed.can_transition(JobStatus::Assembling));
        assert!(!JobStatus::Failed.can_transition(JobStatus::Complete));
        assert!(!JobStatus::Failed.can_transition(JobStatus::Draft));
    }

    #[test]
    fn terminal_states_are_sinks() {
        for to in [
            JobStatus::Draft,
            JobStatus::Processing,
            JobStatus::Illustrating,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert!(!JobStatus::Complete.can_transition(to));
            assert!(!JobStatus::Cancelled.can_transition(to));
        }
    }

    #[test]
    fn complete_requires_assembling() {
        assert!(!JobStatus::Illustrating.can_transition(JobStatus::Complete));
        assert!(!JobStatus::Failed.can_transition(JobStatus::Complete));
        assert!(JobStatus::Assembling.can_transition(JobStatus::Complete));
    }

    #[test]
    fn kebab_case_round_trip() {
        assert_eq!(JobStatus::NarrativePending.to_string(), "narrative-pending");
        assert_eq!(
            JobStatus::from_str("narrative-pending").unwrap(),
            JobStatus::NarrativePending
        );
        let json = serde_json::to_string(&JobStatus::Illustrating).unwrap();
        assert_eq!(json, "\"illustrating\"");
    }
}
