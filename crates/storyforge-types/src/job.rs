//! Job identity, personalization parameters and the persisted job record.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::status::JobStatus;

/// Bounds on the requested story length.
pub const MIN_PAGE_COUNT: u32 = 1;
pub const MAX_PAGE_COUNT: u32 = 40;

/// Unique identifier for a generation job (v4 UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh job id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = Uuid::parse_str(s).map_err(|_| ValidationError::BadJobId {
            raw: s.to_string(),
        })?;
        Ok(Self(parsed.to_string()))
    }
}

/// Description of the child the story is personalized for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildDescriptor {
    pub name: String,
    pub age: u32,
    /// Free-text appearance notes (hair, eyes, build) used for the
    /// consistency directive.
    #[serde(default)]
    pub appearance: String,
}

/// Optional pet appearing alongside the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetDescriptor {
    pub name: String,
    pub species: String,
    #[serde(default)]
    pub appearance: String,
}

/// Where the story premise comes from: a catalog template or free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorySource {
    Template { id: String },
    Prompt { text: String },
}

/// Validated personalization parameters for one job.
///
/// Produced by the external creation flow and validated once at `submit`;
/// invalid input is rejected up front and never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub child: ChildDescriptor,
    #[serde(default)]
    pub pet: Option<PetDescriptor>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Chosen visual style, e.g. "watercolor" or "pixar-like 3d".
    pub style: String,
    pub story: StorySource,
    pub page_count: u32,
    /// Optional reference photo used to seed the consistency protocol.
    #[serde(default)]
    pub reference_photo: Option<Utf8PathBuf>,
}

impl JobConfig {
    /// Validate the parameters; called once at submission.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.child.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "child.name",
            });
        }
        if self.style.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "style" });
        }
        match &self.story {
            StorySource::Template { id } if id.trim().is_empty() => {
                return Err(ValidationError::MissingField { field: "story.id" });
            }
            StorySource::Prompt { text } if text.trim().is_empty() => {
                return Err(ValidationError::MissingField {
                    field: "story.text",
                });
            }
            _ => {}
        }
        if !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&self.page_count) {
            return Err(ValidationError::PageCountOutOfRange {
                got: self.page_count,
                min: MIN_PAGE_COUNT,
                max: MAX_PAGE_COUNT,
            });
        }
        Ok(())
    }

    /// Total number of illustrations: one per story page plus both covers.
    #[must_use]
    pub fn illustration_count(&self) -> u32 {
        self.page_count + 2
    }
}

/// The persisted job row: exactly one per user request.
///
/// Mutated only by the coordinator (through the job store); all fields are
/// derived from persisted state, never from in-memory progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub config: JobConfig,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable message for the last failure, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Number of failed pipeline attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Payment confirmation gate; nothing is dispatched until this is set.
    #[serde(default)]
    pub paid: bool,
}

impl JobRecord {
    /// Create a fresh draft record for a validated config.
    #[must_use]
    pub fn new(job_id: JobId, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            config,
            status: JobStatus::Draft,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            attempts: 0,
            paid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JobConfig {
        JobConfig {
            child: ChildDescriptor {
                name: "Mara".into(),
                age: 6,
                appearance: "curly red hair, green eyes".into(),
            },
            pet: None,
            interests: vec!["dinosaurs".into()],
            traits: vec!["curious".into()],
            style: "watercolor".into(),
            story: StorySource::Prompt {
                text: "Mara finds a dinosaur egg in the garden".into(),
            },
            page_count: 15,
            reference_photo: None,
        }
    }

    #[test]
    fn job_id_round_trip() {
        let id = JobId::new();
        let parsed: JobId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
        assert_eq!(config().illustration_count(), 17);
    }

    #[test]
    fn empty_child_name_rejected() {
        let mut cfg = config();
        cfg.child.name = "  ".into();
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::MissingField { field: "child.name" })
        ));
    }

    #[test]
    fn page_count_bounds_enforced() {
        let mut cfg = config();
        cfg.page_count = 0;
        assert!(cfg.validate().is_err());
        cfg.page_count = MAX_PAGE_COUNT + 1;
        assert!(cfg.validate().is_err());
        cfg.page_count = MAX_PAGE_COUNT;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn new_record_is_unpaid_draft() {
        let record = JobRecord::new(JobId::new(), config());
        assert_eq!(record.status, JobStatus::Draft);
        assert!(!record.paid);
        assert_eq!(record.attempts, 0);
        assert!(record.error.is_none());
    }
}
