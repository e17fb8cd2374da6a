//! Narrative synthesis stage.
//!
//! One text-provider conversation per stage invocation. The provider is
//! asked for a strict JSON document; a response that does not parse or
//! validate is fed back as an assistant turn followed by a corrective user
//! turn, up to the configured attempt budget. The parsed narrative is
//! persisted atomically, all pages or none.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use storyforge_config::PipelineConfig;
use storyforge_providers::{Message, TextProvider, TextRequest};
use storyforge_store::ArtifactStore;
use storyforge_types::{JobConfig, JobId, Narrative, StageError, StorySource, StoryforgeError};

/// Matches a fenced code block so providers that ignore the no-fences
/// instruction still parse.
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.+?)\s*```").unwrap());

const SYSTEM_PROMPT: &str = "You are an author of personalized children's picture books. \
You write warm, age-appropriate stories with a clear beginning, middle and end, \
and you respond with nothing but a single JSON object.";

/// Generate and persist the narrative for a job.
///
/// # Errors
/// `StageError::NarrativeExhausted` once the attempt budget is spent,
/// `StageError::Provider` for a non-retryable provider failure, and store
/// errors from persisting the result.
pub(crate) async fn run(
    text: &dyn TextProvider,
    artifacts: &ArtifactStore,
    pipeline: &PipelineConfig,
    timeout: Duration,
    job_id: &JobId,
    config: &JobConfig,
) -> Result<Narrative, StoryforgeError> {
    let mut messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(build_request(config, pipeline.max_words_per_page)),
    ];
    let mut last_error = String::new();

    for attempt in 1..=pipeline.narrative_attempts {
        debug!(job_id = %job_id, attempt, "requesting narrative");

        let result = text
            .generate(TextRequest::new(
                job_id.as_str(),
                timeout,
                messages.clone(),
            ))
            .await;

        match result {
            Ok(response) => {
                match parse_narrative(
                    &response.raw_response,
                    config.page_count,
                    pipeline.max_words_per_page,
                ) {
                    Ok(narrative) => {
                        artifacts.write_narrative(job_id, &narrative)?;
                        info!(
                            job_id = %job_id,
                            attempt,
                            pages = narrative.pages.len(),
                            title = %narrative.title,
                            "narrative persisted"
                        );
                        return Ok(narrative);
                    }
                    Err(reason) => {
                        warn!(job_id = %job_id, attempt, %reason, "unusable narrative response");
                        last_error = reason.clone();
                        // Keep the bad response in the conversation so the
                        // reformulation can point at what was wrong with it.
                        messages.push(Message::assistant(response.raw_response));
                        messages.push(Message::user(reformulation(&reason)));
                    }
                }
            }
            Err(e) if e.is_retryable() && attempt < pipeline.narrative_attempts => {
                warn!(job_id = %job_id, attempt, error = %e, "transient provider failure");
                last_error = e.to_string();
            }
            Err(e) => return Err(StageError::Provider(e).into()),
        }
    }

    Err(StageError::NarrativeExhausted {
        attempts: pipeline.narrative_attempts,
        last_error,
    }
    .into())
}

fn build_request(config: &JobConfig, max_words_per_page: u32) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Write a {}-page story for {}, age {}.",
        config.page_count, config.child.name, config.child.age
    ));
    if let Some(pet) = &config.pet {
        lines.push(format!(
            "{}'s {} {} appears in the story.",
            config.child.name, pet.species, pet.name
        ));
    }
    if !config.interests.is_empty() {
        lines.push(format!("Interests: {}.", config.interests.join(", ")));
    }
    if !config.traits.is_empty() {
        lines.push(format!(
            "Personality traits to reflect: {}.",
            config.traits.join(", ")
        ));
    }
    match &config.story {
        StorySource::Template { id } => {
            lines.push(format!("Base the story on the '{id}' template premise."));
        }
        StorySource::Prompt { text } => {
            lines.push(format!("Story premise: {text}"));
        }
    }
    lines.push(format!(
        "Each page holds at most {max_words_per_page} words. Every page needs an \
         illustration_directive: a concrete visual scene description naming who is in \
         frame, the setting and the action, suitable for an illustrator who has not \
         read the story."
    ));
    lines.push(
        "Respond with ONLY this JSON object, no code fences, no commentary:\n\
         {\"title\": \"...\", \"pages\": [{\"index\": 1, \"text\": \"...\", \
         \"illustration_directive\": \"...\"}, ...]}\n\
         Page indices are 1-based and sequential."
            .to_string(),
    );
    lines.join("\n")
}

fn reformulation(reason: &str) -> String {
    format!(
        "That response could not be used: {reason}. Respond again with ONLY the \
         JSON object described earlier. No code fences, no text before or after \
         the JSON, exact page count, sequential 1-based indices."
    )
}

/// Parse and structurally validate a provider response.
///
/// Tolerates code fences and surrounding prose; everything else is a
/// reformulation-worthy failure described by the returned reason.
pub(crate) fn parse_narrative(
    raw: &str,
    page_count: u32,
    max_words_per_page: u32,
) -> Result<Narrative, String> {
    let candidate = CODE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str())
        .trim();

    let narrative: Narrative = serde_json::from_str(candidate)
        .or_else(|first_err| {
            // Some providers wrap the JSON in prose; take the outermost
            // object if one is present.
            match (candidate.find('{'), candidate.rfind('}')) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&candidate[start..=end])
                }
                _ => Err(first_err),
            }
        })
        .map_err(|e| format!("response is not valid narrative JSON: {e}"))?;

    narrative
        .validate(page_count, max_words_per_page)
        .map_err(|e| e.to_string())?;
    Ok(narrative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use storyforge_providers::TextResult;
    use storyforge_store::StorePaths;
    use storyforge_types::{ChildDescriptor, ProviderError};
    use tempfile::TempDir;

    fn narrative_json(pages: u32) -> String {
        let pages: Vec<String> = (1..=pages)
            .map(|i| {
                format!(
                    r#"{{"index": {i}, "text": "Page {i}.", "illustration_directive": "Scene {i}"}}"#
                )
            })
            .collect();
        format!(r#"{{"title": "The Test", "pages": [{}]}}"#, pages.join(","))
    }

    #[test]
    fn parses_plain_json() {
        let n = parse_narrative(&narrative_json(3), 3, 80).unwrap();
        assert_eq!(n.title, "The Test");
        assert_eq!(n.pages.len(), 3);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = format!("```json\n{}\n```", narrative_json(2));
        assert!(parse_narrative(&raw, 2, 80).is_ok());
    }

    #[test]
    fn parses_prose_wrapped_json() {
        let raw = format!("Here is your story!\n{}\nEnjoy.", narrative_json(2));
        assert!(parse_narrative(&raw, 2, 80).is_ok());
    }

    #[test]
    fn rejects_wrong_page_count_with_reason() {
        let reason = parse_narrative(&narrative_json(2), 3, 80).unwrap_err();
        assert!(reason.contains("expected 3 pages"));
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_narrative("Once upon a time...", 3, 80).is_err());
    }

    struct ScriptedProvider {
        responses: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TextProvider for ScriptedProvider {
        async fn generate(&self, _request: TextRequest) -> Result<TextResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let raw = if responses.is_empty() {
                "no script left".to_string()
            } else {
                responses.remove(0)
            };
            Ok(TextResult::new(raw, "fake", "fake-model"))
        }
    }

    fn fixtures(dir: &TempDir) -> (ArtifactStore, JobId, JobConfig) {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let artifacts = ArtifactStore::new(StorePaths::new(root));
        let config = JobConfig {
            child: ChildDescriptor {
                name: "Mara".into(),
                age: 6,
                appearance: String::new(),
            },
            pet: None,
            interests: vec![],
            traits: vec![],
            style: "watercolor".into(),
            story: StorySource::Prompt {
                text: "a garden adventure".into(),
            },
            page_count: 3,
            reference_photo: None,
        };
        (artifacts, JobId::new(), config)
    }

    #[tokio::test]
    async fn malformed_then_good_response_succeeds() {
        let dir = TempDir::new().unwrap();
        let (artifacts, job_id, config) = fixtures(&dir);
        let provider =
            ScriptedProvider::new(vec!["not json at all".into(), narrative_json(3)]);

        let narrative = run(
            &provider,
            &artifacts,
            &PipelineConfig::default(),
            Duration::from_secs(5),
            &job_id,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(narrative.pages.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(artifacts.narrative_exists(&job_id));
    }

    #[tokio::test]
    async fn budget_exhaustion_after_persistent_garbage() {
        let dir = TempDir::new().unwrap();
        let (artifacts, job_id, config) = fixtures(&dir);
        let provider = ScriptedProvider::new(vec![]);

        let err = run(
            &provider,
            &artifacts,
            &PipelineConfig::default(),
            Duration::from_secs(5),
            &job_id,
            &config,
        )
        .await
        .unwrap_err();

        // Default budget is three total attempts, all consumed.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        match err {
            StoryforgeError::Stage(StageError::NarrativeExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(!last_error.is_empty());
            }
            other => panic!("expected NarrativeExhausted, got {other}"),
        }
        assert!(!artifacts.narrative_exists(&job_id));
    }

    #[tokio::test]
    async fn non_retryable_provider_error_fails_fast() {
        struct AuthFails;
        #[async_trait]
        impl TextProvider for AuthFails {
            async fn generate(&self, _r: TextRequest) -> Result<TextResult, ProviderError> {
                Err(ProviderError::Auth("bad key".into()))
            }
        }

        let dir = TempDir::new().unwrap();
        let (artifacts, job_id, config) = fixtures(&dir);

        let err = run(
            &AuthFails,
            &artifacts,
            &PipelineConfig::default(),
            Duration::from_secs(5),
            &job_id,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            StoryforgeError::Stage(StageError::Provider(ProviderError::Auth(_)))
        ));
    }
}
