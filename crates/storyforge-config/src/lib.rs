//! Configuration for the storyforge pipeline.
//!
//! A single `storyforge.toml` with one section per concern. Every knob has
//! a serde default so an empty file is a valid configuration. API keys are
//! referenced by environment variable name and never stored in the file.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fs;

use storyforge_types::ConfigError;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub text_provider: TextProviderConfig,
    #[serde(default)]
    pub image_provider: ImageProviderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Where job state and artifacts are persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: Utf8PathBuf,
}

/// Text-generation provider (narrative synthesis).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextProviderConfig {
    /// Environment variable holding the API key.
    #[serde(default = "default_text_api_key_env")]
    pub api_key_env: String,
    /// Override for the provider endpoint (testing, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_text_model")]
    pub model: String,
    #[serde(default = "default_text_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_text_temperature")]
    pub temperature: f32,
    #[serde(default = "default_text_timeout_secs")]
    pub timeout_secs: u64,
}

/// Image-generation provider (illustration synthesis).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageProviderConfig {
    #[serde(default = "default_image_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_image_model")]
    pub model: String,
    /// Requested output dimensions, recorded on each illustration.
    #[serde(default = "default_image_dim")]
    pub width: u32,
    #[serde(default = "default_image_dim")]
    pub height: u32,
    #[serde(default = "default_image_timeout_secs")]
    pub timeout_secs: u64,
}

/// Stage behavior knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Upper bound on words per story page.
    #[serde(default = "default_max_words_per_page")]
    pub max_words_per_page: u32,
    /// Total narrative attempts (first try plus reformulated retries)
    /// before the stage fails permanently.
    #[serde(default = "default_narrative_attempts")]
    pub narrative_attempts: u32,
    /// Re-inject the reference likeness every Nth illustration index.
    /// Empirically chosen; kept configurable on purpose.
    #[serde(default = "default_reinforcement_cadence")]
    pub reinforcement_cadence: u32,
}

/// Admission, concurrency and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Global cap on concurrently running jobs. Kept low on purpose: the
    /// external providers are the bottleneck.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Whole-job attempt budget before a job is marked failed for good.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

fn default_storage_root() -> Utf8PathBuf {
    Utf8PathBuf::from("./storyforge-data")
}
fn default_text_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_text_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_text_max_tokens() -> u32 {
    8192
}
fn default_text_temperature() -> f32 {
    0.7
}
fn default_text_timeout_secs() -> u64 {
    120
}
fn default_image_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".into()
}
fn default_image_dim() -> u32 {
    1024
}
fn default_image_timeout_secs() -> u64 {
    300
}
fn default_max_words_per_page() -> u32 {
    80
}
fn default_narrative_attempts() -> u32 {
    3
}
fn default_reinforcement_cadence() -> u32 {
    5
}
fn default_max_concurrent_jobs() -> u32 {
    2
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    10
}
fn default_backoff_cap_secs() -> u64 {
    900
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for TextProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_text_api_key_env(),
            base_url: None,
            model: default_text_model(),
            max_tokens: default_text_max_tokens(),
            temperature: default_text_temperature(),
            timeout_secs: default_text_timeout_secs(),
        }
    }
}

impl Default for ImageProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_image_api_key_env(),
            base_url: None,
            model: default_image_model(),
            width: default_image_dim(),
            height: default_image_dim(),
            timeout_secs: default_image_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_words_per_page: default_max_words_per_page(),
            narrative_attempts: default_narrative_attempts(),
            reinforcement_cadence: default_reinforcement_cadence(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    ///
    /// # Errors
    /// `ConfigError::NotFound` if the file is missing, `Parse` if the TOML
    /// does not deserialize, `Invalid` if a value fails validation.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.to_string(),
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    ///
    /// # Errors
    /// Same as [`Config::load`], except a missing file is not an error.
    pub fn load_or_default(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    /// `ConfigError::Invalid` with an actionable message.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.narrative_attempts == 0 {
            return Err(ConfigError::Invalid {
                reason: "pipeline.narrative_attempts must be at least 1".into(),
            });
        }
        if self.pipeline.reinforcement_cadence == 0 {
            return Err(ConfigError::Invalid {
                reason: "pipeline.reinforcement_cadence must be at least 1".into(),
            });
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                reason: "scheduler.max_concurrent_jobs must be at least 1".into(),
            });
        }
        if self.scheduler.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                reason: "scheduler.max_attempts must be at least 1".into(),
            });
        }
        if self.scheduler.backoff_cap_secs < self.scheduler.backoff_base_secs {
            return Err(ConfigError::Invalid {
                reason: "scheduler.backoff_cap_secs must be >= backoff_base_secs".into(),
            });
        }
        Ok(())
    }
}
