//! Anthropic Messages API backend for narrative synthesis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use storyforge_config::TextProviderConfig;
use storyforge_types::ProviderError;

use crate::http::HttpClient;
use crate::types::{Message, Role, TextProvider, TextRequest, TextResult};

/// Default Anthropic API endpoint
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP text backend for Anthropic's Messages API.
#[derive(Clone)]
pub struct AnthropicTextProvider {
    client: HttpClient,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl AnthropicTextProvider {
    /// Build from configuration, resolving the API key from its env var.
    ///
    /// # Errors
    /// `ProviderError::Misconfiguration` if the key env var is unset or the
    /// HTTP client cannot be constructed.
    pub fn from_config(config: &TextProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::Misconfiguration(format!(
                "text provider API key not found in environment variable '{}'; \
                 set it or configure a different api_key_env in [text_provider]",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            client: HttpClient::new()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Separate system messages from the conversation; Anthropic's API
    /// takes the system prompt as a dedicated field.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if let Some(existing) = system_prompt.as_mut() {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    } else {
                        system_prompt = Some(msg.content.clone());
                    }
                }
                Role::User => converted.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: msg.content.clone(),
                }),
                Role::Assistant => converted.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        (system_prompt, converted)
    }
}

#[async_trait]
impl TextProvider for AnthropicTextProvider {
    async fn generate(&self, request: TextRequest) -> Result<TextResult, ProviderError> {
        debug!(
            provider = "anthropic",
            job_id = %request.job_id,
            model = %self.model,
            "invoking text provider"
        );

        let (system, messages) = Self::convert_messages(&request.messages);

        let body = AnthropicRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
        };

        let http_request = reqwest::Client::new()
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let timeout = if request.timeout.is_zero() {
            self.timeout
        } else {
            request.timeout
        };
        let response = self
            .client
            .execute_with_retry(http_request, timeout, "anthropic")
            .await?;

        let body: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::Malformed(format!("failed to parse Anthropic response: {e}"))
        })?;

        let content: String = body
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        if content.is_empty() {
            return Err(ProviderError::Malformed(
                "Anthropic response missing text content".to_string(),
            ));
        }

        let mut result = TextResult::new(content, "anthropic", self.model.clone());
        if let Some(usage) = body.usage {
            result.tokens_input = Some(usage.input_tokens);
            result.tokens_output = Some(usage.output_tokens);
        }

        debug!(
            provider = "anthropic",
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "text invocation completed"
        );

        Ok(result)
    }
}

/// Anthropic message format for requests
#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

/// Anthropic request body
#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

/// Anthropic response body
#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
