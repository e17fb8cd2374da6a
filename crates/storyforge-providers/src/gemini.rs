//! Gemini image backend with a multi-turn generation session.
//!
//! The whole point of this backend is statefulness: each `next_image` call
//! appends to one growing conversation (`contents`), so the model's
//! short-term memory of the subject's appearance carries from image to
//! image. Independent context-free calls were found to destroy consistency,
//! which is why the session owns the history and the trait offers no
//! one-shot path.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use storyforge_config::ImageProviderConfig;
use storyforge_types::ProviderError;

use crate::http::HttpClient;
use crate::types::{GeneratedImage, ImageData, ImageProvider, ImageSeed, ImageSession, ImageTurn};

/// Default Gemini API base (model and action are appended).
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// HTTP image backend for Gemini's `generateContent` API.
#[derive(Clone)]
pub struct GeminiImageProvider {
    client: HttpClient,
    url: String,
    api_key: String,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl GeminiImageProvider {
    /// Build from configuration, resolving the API key from its env var.
    ///
    /// # Errors
    /// `ProviderError::Misconfiguration` if the key env var is unset or the
    /// HTTP client cannot be constructed.
    pub fn from_config(config: &ImageProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::Misconfiguration(format!(
                "image provider API key not found in environment variable '{}'; \
                 set it or configure a different api_key_env in [image_provider]",
                config.api_key_env
            ))
        })?;

        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let url = format!("{}/{}:generateContent", base, config.model);

        Ok(Self {
            client: HttpClient::new()?,
            url,
            api_key,
            width: config.width,
            height: config.height,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl ImageProvider for GeminiImageProvider {
    async fn open_session(&self, seed: ImageSeed) -> Result<Box<dyn ImageSession>, ProviderError> {
        let mut history = Vec::new();

        // The seed becomes the first user turn: the appearance-and-style
        // directive plus the reference likeness when one was supplied.
        let mut parts = vec![Part::text(seed.directive)];
        if let Some(reference) = seed.reference {
            parts.push(Part::inline(&reference));
        }
        history.push(Content {
            role: "user".to_string(),
            parts,
        });

        Ok(Box::new(GeminiImageSession {
            client: self.client.clone(),
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            history,
            width: self.width,
            height: self.height,
            timeout: self.timeout,
        }))
    }
}

/// One live session: the accumulated conversation plus connection details.
struct GeminiImageSession {
    client: HttpClient,
    url: String,
    api_key: String,
    history: Vec<Content>,
    width: u32,
    height: u32,
    timeout: Duration,
}

#[async_trait]
impl ImageSession for GeminiImageSession {
    async fn next_image(&mut self, turn: ImageTurn) -> Result<GeneratedImage, ProviderError> {
        let mut parts = vec![Part::text(turn.prompt)];
        if let Some(reference) = &turn.reference {
            parts.push(Part::inline(reference));
        }
        self.history.push(Content {
            role: "user".to_string(),
            parts,
        });

        let body = GenerateContentRequest {
            contents: &self.history,
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".to_string()],
            },
        };

        let request = reqwest::Client::new()
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        debug!(turns = self.history.len(), "requesting next session image");

        let response = self
            .client
            .execute_with_retry(request, self.timeout, "gemini")
            .await?;

        let body: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::Malformed(format!("failed to parse Gemini response: {e}"))
        })?;

        let content = body
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content)
            .ok_or_else(|| {
                ProviderError::Malformed("Gemini response contained no candidates".to_string())
            })?;

        let inline = content
            .parts
            .iter()
            .find_map(|part| part.inline_data.as_ref())
            .ok_or_else(|| {
                ProviderError::Malformed("Gemini response contained no image data".to_string())
            })?;

        let bytes = BASE64.decode(&inline.data).map_err(|e| {
            ProviderError::Malformed(format!("invalid base64 image payload: {e}"))
        })?;
        let mime = inline.mime_type.clone();

        // Feed the model turn back into the history so the next request
        // carries the session's own output forward.
        self.history.push(content);

        Ok(GeneratedImage {
            bytes,
            mime,
            width: self.width,
            height: self.height,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            inline_data: None,
        }
    }

    fn inline(data: &ImageData) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: data.mime.clone(),
                data: BASE64.encode(&data.bytes),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    /// Base64-encoded image bytes.
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_part_round_trips_base64() {
        let data = ImageData {
            mime: "image/png".into(),
            bytes: vec![1, 2, 3, 255],
        };
        let part = Part::inline(&data);
        let inline = part.inline_data.unwrap();
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(BASE64.decode(&inline.data).unwrap(), vec![1, 2, 3, 255]);
    }

    #[test]
    fn response_parsing_extracts_image() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                    ]
                }
            }]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let inline = parsed.candidates[0]
            .content
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .unwrap();
        assert_eq!(BASE64.decode(&inline.data).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_candidates_is_malformed() {
        let parsed: GenerateContentResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.candidates.is_empty());
    }

    #[test]
    fn request_body_shape() {
        let contents = vec![Content {
            role: "user".into(),
            parts: vec![Part::text("a castle")],
        }];
        let body = GenerateContentRequest {
            contents: &contents,
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE".into()],
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["responseModalities"][0], "IMAGE");
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
    }
}
