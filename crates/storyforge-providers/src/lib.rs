//! Provider backends for storyforge.
//!
//! Two trait families: [`TextProvider`] for narrative synthesis and
//! [`ImageProvider`]/[`ImageSession`] for illustration synthesis. The image
//! side is deliberately session-shaped: consistency of the depicted subject
//! depends on every image being a new turn in one multi-turn conversation,
//! so the trait forces callers through an explicit session value instead of
//! offering a context-free `generate` call.

mod anthropic;
mod gemini;
pub(crate) mod http;
mod types;

pub use anthropic::AnthropicTextProvider;
pub use gemini::GeminiImageProvider;
pub use types::{
    GeneratedImage, ImageData, ImageProvider, ImageSeed, ImageSession, ImageTurn, Message, Role,
    TextProvider, TextRequest, TextResult,
};

pub use storyforge_types::ProviderError;

use std::sync::Arc;
use storyforge_config::Config;

/// Build the HTTP-backed text provider from configuration.
///
/// # Errors
/// `ProviderError::Misconfiguration` if the API key env var is unset or the
/// HTTP client cannot be constructed.
pub fn text_provider_from_config(config: &Config) -> Result<Arc<dyn TextProvider>, ProviderError> {
    Ok(Arc::new(AnthropicTextProvider::from_config(
        &config.text_provider,
    )?))
}

/// Build the HTTP-backed image provider from configuration.
///
/// # Errors
/// `ProviderError::Misconfiguration` if the API key env var is unset or the
/// HTTP client cannot be constructed.
pub fn image_provider_from_config(
    config: &Config,
) -> Result<Arc<dyn ImageProvider>, ProviderError> {
    Ok(Arc::new(GeminiImageProvider::from_config(
        &config.image_provider,
    )?))
}
