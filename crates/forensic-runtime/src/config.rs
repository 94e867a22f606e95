//! Runtime configuration.
//!
//! Defaults describe a working deployment: an OpenAI-compatible Llama
//! endpoint for the auditor and Anthropic for the judge. A YAML file may
//! override any subset of fields, and a few environment variables override
//! the file.
//!
//! ```yaml
//! auditor:
//!   model: meta-llama/Llama-3.2-3B-Instruct
//!   timeout: 30s
//! judge:
//!   provider: anthropic
//!   timeout: 60
//! retry:
//!   max_attempts: 3
//!   base_delay: 1s
//! prompt_dir: ./prompts
//! ```
//!
//! Without `prompt_dir` the agents use the prompts compiled into the
//! binary.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::prompts::PromptSource;

pub const ENV_AUDITOR_MODEL: &str = "FORENSIC_AUDITOR_MODEL";
pub const ENV_JUDGE_MODEL: &str = "FORENSIC_JUDGE_MODEL";
pub const ENV_MAX_ATTEMPTS: &str = "FORENSIC_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY: &str = "FORENSIC_RETRY_BASE_DELAY";
pub const ENV_PROMPT_DIR: &str = "FORENSIC_PROMPT_DIR";

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Transport protocol spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions (Together, Groq, vLLM, Ollama)
    Openai,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Openai => "https://api.together.xyz/v1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Openai => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one model backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Bound on a single model call
    pub timeout: Duration,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Mark the system prompt cacheable (Anthropic only)
    pub prompt_caching: bool,
}

impl BackendConfig {
    /// Auditor default: Llama 3.2 3B over an OpenAI-compatible API.
    pub fn auditor_default() -> Self {
        Self {
            provider: ProviderKind::Openai,
            model: "meta-llama/Llama-3.2-3B-Instruct".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
            base_url: ProviderKind::Openai.default_base_url().to_string(),
            api_key_env: "LLAMA_API_KEY".to_string(),
            prompt_caching: false,
        }
    }

    /// Judge default: Claude Sonnet over the Anthropic API.
    pub fn judge_default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
            base_url: ProviderKind::Anthropic.default_base_url().to_string(),
            api_key_env: "CLAUDE_API_KEY".to_string(),
            prompt_caching: true,
        }
    }

    fn apply(&mut self, o: BackendOverrides) {
        if let Some(provider) = o.provider {
            // Switching protocol without naming an endpoint means the new
            // protocol's default endpoint.
            if provider != self.provider && o.base_url.is_none() {
                self.base_url = provider.default_base_url().to_string();
            }
            self.provider = provider;
        }
        if let Some(model) = o.model {
            self.model = model;
        }
        if let Some(max_tokens) = o.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(temperature) = o.temperature {
            self.temperature = temperature;
        }
        if let Some(timeout) = o.timeout {
            self.timeout = timeout;
        }
        if let Some(base_url) = o.base_url {
            self.base_url = base_url;
        }
        if let Some(api_key_env) = o.api_key_env {
            self.api_key_env = api_key_env;
        }
        if let Some(prompt_caching) = o.prompt_caching {
            self.prompt_caching = prompt_caching;
        }
    }

    fn validate(&self, role: &str) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid(format!("{role}.model"), "must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid(format!("{role}.max_tokens"), "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                format!("{role}.temperature"),
                format!("must be between 0.0 and 2.0, got {}", self.temperature),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(format!("{role}.timeout"), "must be positive"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                format!("{role}.base_url"),
                "must start with http:// or https://",
            ));
        }
        Ok(())
    }
}

/// Shared retry budget for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after a transient failure on `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub auditor: BackendConfig,
    pub judge: BackendConfig,
    pub retry: RetryPolicy,
    /// Directory holding the prompt resource files. `None` uses the
    /// prompts compiled into the binary.
    pub prompt_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auditor: BackendConfig::auditor_default(),
            judge: BackendConfig::judge_default(),
            retry: RetryPolicy::default(),
            prompt_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, then the optional YAML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Defaults overlaid with YAML text. Unset fields keep their default.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if yaml.trim().is_empty() {
            return Ok(config);
        }

        let file: ConfigFile = serde_yaml::from_str(yaml)?;
        if let Some(auditor) = file.auditor {
            config.auditor.apply(auditor);
        }
        if let Some(judge) = file.judge {
            config.judge.apply(judge);
        }
        if let Some(retry) = file.retry {
            if let Some(max_attempts) = retry.max_attempts {
                config.retry.max_attempts = max_attempts;
            }
            if let Some(base_delay) = retry.base_delay {
                config.retry.base_delay = base_delay;
            }
        }
        if let Some(prompt_dir) = file.prompt_dir {
            config.prompt_dir = Some(prompt_dir);
        }
        Ok(config)
    }

    /// Apply `FORENSIC_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup(ENV_AUDITOR_MODEL) {
            self.auditor.model = model;
        }
        if let Some(model) = lookup(ENV_JUDGE_MODEL) {
            self.judge.model = model;
        }
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_MAX_ATTEMPTS, format!("not an integer: {raw}")))?;
        }
        if let Some(raw) = lookup(ENV_RETRY_BASE_DELAY) {
            self.retry.base_delay = parse_duration(&raw)
                .map_err(|message| ConfigError::invalid(ENV_RETRY_BASE_DELAY, message))?;
        }
        if let Some(dir) = lookup(ENV_PROMPT_DIR) {
            self.prompt_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Where the agents read their prompts from.
    pub fn prompt_source(&self) -> PromptSource {
        match &self.prompt_dir {
            Some(dir) => PromptSource::Directory(dir.clone()),
            None => PromptSource::Embedded,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auditor.validate("auditor")?;
        self.judge.validate("judge")?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    auditor: Option<BackendOverrides>,
    judge: Option<BackendOverrides>,
    retry: Option<RetryOverrides>,
    prompt_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackendOverrides {
    provider: Option<ProviderKind>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    timeout: Option<Duration>,
    base_url: Option<String>,
    api_key_env: Option<String>,
    prompt_caching: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryOverrides {
    max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    base_delay: Option<Duration>,
}

/// Integer seconds or a humantime string ("1s", "250ms", "2m").
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| format!("invalid duration '{raw}': {e}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDuration>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDuration::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(RawDuration::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
