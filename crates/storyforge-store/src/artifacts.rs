//! Artifact persistence: narrative, illustration blobs + records, document.
//!
//! Illustration writes follow the bytes-then-record order. A blob with no
//! matching record (interruption between the two) is reported as absent and
//! simply overwritten on resume; it is a no-op to clean up, not a
//! correctness hazard.

use camino::Utf8Path;
use chrono::Utc;
use std::fs;
use tracing::debug;

use storyforge_types::{DocumentRecord, IllustrationRecord, JobId, Narrative, StoreError};

use crate::atomic::{write_bytes_atomic, write_json_atomic};
use crate::paths::StorePaths;

/// Store for per-job stage outputs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: StorePaths,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    // --- narrative ---

    /// Atomically persist the complete narrative (all pages or none).
    /// Regeneration replaces the file wholesale.
    ///
    /// # Errors
    /// Returns `StoreError` on serialization or IO failure.
    pub fn write_narrative(&self, job_id: &JobId, narrative: &Narrative) -> Result<(), StoreError> {
        write_json_atomic(&self.paths.narrative(job_id), narrative)
    }

    /// # Errors
    /// `StoreError::Corrupt` if the file exists but does not parse.
    pub fn read_narrative(&self, job_id: &JobId) -> Result<Option<Narrative>, StoreError> {
        read_json_opt(&self.paths.narrative(job_id))
    }

    #[must_use]
    pub fn narrative_exists(&self, job_id: &JobId) -> bool {
        self.paths.narrative(job_id).exists()
    }

    // --- illustrations ---

    /// Upsert the illustration for `(job_id, index)`: bytes first, record
    /// second. Writing the same key twice replaces, never duplicates.
    ///
    /// # Errors
    /// Returns `StoreError` on IO failure. The record is only written after
    /// the bytes are durably on disk.
    pub fn put_illustration(
        &self,
        job_id: &JobId,
        index: u32,
        bytes: &[u8],
        prompt: &str,
        width: u32,
        height: u32,
    ) -> Result<IllustrationRecord, StoreError> {
        let blob_path = self.paths.illustration_blob(job_id, index);
        write_bytes_atomic(&blob_path, bytes)?;

        let record = IllustrationRecord {
            page_index: index,
            blob: blob_path
                .file_name()
                .unwrap_or_default()
                .to_string(),
            prompt: prompt.to_string(),
            width,
            height,
            blake3: blake3::hash(bytes).to_hex().to_string(),
            generated_at: Utc::now(),
        };
        write_json_atomic(&self.paths.illustration_record(job_id, index), &record)?;

        debug!(job_id = %job_id, index, bytes = bytes.len(), "illustration persisted");
        Ok(record)
    }

    /// Whether `(job_id, index)` is fully persisted: record *and* bytes.
    /// An orphaned blob without a record counts as absent.
    #[must_use]
    pub fn illustration_complete(&self, job_id: &JobId, index: u32) -> bool {
        self.paths.illustration_record(job_id, index).exists()
            && self.paths.illustration_blob(job_id, index).exists()
    }

    /// # Errors
    /// `StoreError::Corrupt` if the record exists but does not parse.
    pub fn read_illustration(
        &self,
        job_id: &JobId,
        index: u32,
    ) -> Result<Option<IllustrationRecord>, StoreError> {
        read_json_opt(&self.paths.illustration_record(job_id, index))
    }

    /// # Errors
    /// `StoreError::ArtifactNotFound` if the blob is missing.
    pub fn read_illustration_bytes(
        &self,
        job_id: &JobId,
        index: u32,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.paths.illustration_blob(job_id, index);
        fs::read(&path).map_err(|_| StoreError::ArtifactNotFound {
            what: format!("illustration blob {path}"),
        })
    }

    /// Sorted indices of fully-persisted illustrations for a job.
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the directory exists but cannot be read.
    pub fn illustration_indices(&self, job_id: &JobId) -> Result<Vec<u32>, StoreError> {
        let dir = self.paths.illustrations_dir(job_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut indices = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Ok(index) = stem.parse::<u32>() {
                if self.illustration_complete(job_id, index) {
                    indices.push(index);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    // --- document ---

    /// Persist the assembled document: blob, then record, overwriting any
    /// prior version in place.
    ///
    /// # Errors
    /// Returns `StoreError` on IO failure.
    pub fn write_document(
        &self,
        job_id: &JobId,
        bytes: &[u8],
        page_count: u32,
        placeholders: Vec<u32>,
    ) -> Result<DocumentRecord, StoreError> {
        let blob_path = self.paths.document_blob(job_id);
        write_bytes_atomic(&blob_path, bytes)?;

        let record = DocumentRecord {
            blob: blob_path.file_name().unwrap_or_default().to_string(),
            byte_size: bytes.len() as u64,
            page_count,
            placeholders,
            assembled_at: Utc::now(),
        };
        write_json_atomic(&self.paths.document_record(job_id), &record)?;
        Ok(record)
    }

    /// # Errors
    /// `StoreError::Corrupt` if the record exists but does not parse.
    pub fn read_document(&self, job_id: &JobId) -> Result<Option<DocumentRecord>, StoreError> {
        read_json_opt(&self.paths.document_record(job_id))
    }

    /// Document counts as present only when record and blob both exist.
    #[must_use]
    pub fn document_exists(&self, job_id: &JobId) -> bool {
        self.paths.document_record(job_id).exists() && self.paths.document_blob(job_id).exists()
    }
}

fn read_json_opt<T: serde::de::DeserializeOwned>(
    path: &Utf8Path,
) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(value))
}
