//! Persisted stage outputs: narrative, illustrations and the assembled
//! document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The three kinds of persisted artifact, used as blob-store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Narrative,
    Illustration,
    Document,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Narrative => "narrative",
            Self::Illustration => "illustration",
            Self::Document => "document",
        }
    }
}

/// What a given illustration index depicts.
///
/// Index 0 is the front cover, 1..=N the story pages, N+1 the back cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    FrontCover,
    /// 1-based story page number.
    Story(u32),
    BackCover,
}

impl PageRole {
    /// Classify an illustration index for a story with `page_count` pages.
    #[must_use]
    pub fn of_index(index: u32, page_count: u32) -> Self {
        if index == 0 {
            Self::FrontCover
        } else if index <= page_count {
            Self::Story(index)
        } else {
            Self::BackCover
        }
    }
}

/// One page of generated story text plus its illustration directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativePage {
    /// 1-based story page number.
    pub index: u32,
    pub text: String,
    /// Scene description handed to the illustration stage.
    pub illustration_directive: String,
}

/// The complete generated narrative. At most one per job; written
/// atomically, all pages or none, and replaced wholesale on regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub title: String,
    pub pages: Vec<NarrativePage>,
}

impl Narrative {
    /// Structural validation of a parsed provider response.
    ///
    /// # Errors
    /// Returns [`ValidationError::NarrativeShape`] describing the first
    /// structural problem found.
    pub fn validate(&self, page_count: u32, max_words_per_page: u32) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::NarrativeShape {
                reason: "empty title".into(),
            });
        }
        if self.pages.len() != page_count as usize {
            return Err(ValidationError::NarrativeShape {
                reason: format!("expected {page_count} pages, got {}", self.pages.len()),
            });
        }
        for (i, page) in self.pages.iter().enumerate() {
            let expected = i as u32 + 1;
            if page.index != expected {
                return Err(ValidationError::NarrativeShape {
                    reason: format!("page {expected} has index {}", page.index),
                });
            }
            if page.text.trim().is_empty() {
                return Err(ValidationError::NarrativeShape {
                    reason: format!("page {expected} has empty text"),
                });
            }
            let words = page.text.split_whitespace().count() as u32;
            if words > max_words_per_page {
                return Err(ValidationError::NarrativeShape {
                    reason: format!(
                        "page {expected} has {words} words, limit is {max_words_per_page}"
                    ),
                });
            }
            if page.illustration_directive.trim().is_empty() {
                return Err(ValidationError::NarrativeShape {
                    reason: format!("page {expected} has empty illustration directive"),
                });
            }
        }
        Ok(())
    }
}

/// Metadata record for one generated illustration, keyed by
/// `(job_id, page_index)`. The image bytes live in the blob store; the
/// record is written after the bytes so an interruption between the two is
/// detectable on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IllustrationRecord {
    pub page_index: u32,
    /// Blob filename relative to the job's illustration directory.
    pub blob: String,
    /// The exact prompt sent for this image.
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    /// BLAKE3 hash of the stored bytes, for integrity checks on resume.
    pub blake3: String,
    pub generated_at: DateTime<Utc>,
}

/// Metadata record for the assembled document. One per job, overwritten in
/// place on regeneration, never versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Blob filename relative to the job directory.
    pub blob: String,
    pub byte_size: u64,
    /// Total positions in the document: story pages plus both covers.
    pub page_count: u32,
    /// Indices rendered as text-only placeholders because their
    /// illustration was missing at assembly time.
    #[serde(default)]
    pub placeholders: Vec<u32>,
    pub assembled_at: DateTime<Utc>,
}
