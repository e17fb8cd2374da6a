//! Core types for the provider abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use storyforge_types::ProviderError;

/// Role of a message in a text-generation conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a text-generation conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Input to one text-generation call.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// Job id, for tracing only.
    pub job_id: String,
    pub timeout: Duration,
    pub messages: Vec<Message>,
}

impl TextRequest {
    #[must_use]
    pub fn new(job_id: impl Into<String>, timeout: Duration, messages: Vec<Message>) -> Self {
        Self {
            job_id: job_id.into(),
            timeout,
            messages,
        }
    }
}

/// Result of one text-generation call.
#[derive(Debug, Clone)]
pub struct TextResult {
    pub raw_response: String,
    pub provider: String,
    pub model_used: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl TextResult {
    #[must_use]
    pub fn new(
        raw_response: impl Into<String>,
        provider: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            raw_response: raw_response.into(),
            provider: provider.into(),
            model_used: model_used.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }
}

/// Text-generation collaborator used by the narrative stage.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Generate a completion for the given conversation.
    ///
    /// # Errors
    /// Returns `ProviderError` for transport, auth, quota, outage or
    /// timeout failures.
    async fn generate(&self, request: TextRequest) -> Result<TextResult, ProviderError>;
}

/// Raw image bytes plus their MIME type.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Session-opening payload: the appearance-and-style directive plus the
/// optional reference likeness the whole session is anchored to.
#[derive(Debug, Clone)]
pub struct ImageSeed {
    /// Detailed subject directive: facial structure, hair, eyes,
    /// proportions, and the chosen visual style.
    pub directive: String,
    pub reference: Option<ImageData>,
}

/// One generation turn within an open session.
#[derive(Debug, Clone)]
pub struct ImageTurn {
    pub prompt: String,
    /// Re-attached reference likeness on reinforcement turns, to counter
    /// context drift over long sessions.
    pub reference: Option<ImageData>,
}

/// One generated image.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// Live multi-turn image-generation session.
///
/// Owned exclusively by one illustration-stage invocation; never persisted
/// or shared across processes. A broken session must be discarded, not
/// continued: after an error the owner aborts and a later resume opens a
/// fresh session seeded identically.
#[async_trait]
pub trait ImageSession: Send {
    /// Generate the next image as a new turn in this session.
    ///
    /// # Errors
    /// Returns `ProviderError`; any error invalidates the session.
    async fn next_image(&mut self, turn: ImageTurn) -> Result<GeneratedImage, ProviderError>;
}

/// Image-generation collaborator used by the illustration stage.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Open a fresh session seeded with the subject directive and optional
    /// reference likeness.
    ///
    /// # Errors
    /// Returns `ProviderError` if the session cannot be established.
    async fn open_session(&self, seed: ImageSeed) -> Result<Box<dyn ImageSession>, ProviderError>;
}
