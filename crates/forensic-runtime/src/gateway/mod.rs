//! Model gateway: structured generation with self-healing retries.
//!
//! [`ModelGateway::generate`] asks a backend for a value of type `T`:
//!
//! 1. The JSON Schema generated from `T` is appended to the system prompt
//! 2. The backend is called under its timeout
//! 3. JSON is extracted from the response text ([`extract_json`])
//! 4. The JSON is validated against the schema, deserialized, and checked
//!    with [`StructuredOutput::check`]
//!
//! Parsing and schema failures are fed back to the model verbatim as a
//! correction block on the next attempt. Transient transport failures back
//! off exponentially. Both share one attempt budget. Fatal transport
//! failures end the call immediately.

mod extract;

pub use extract::{extract_json, ExtractError};

use std::sync::Arc;
use std::time::Duration;

use forensic_core::{
    schema_text, CriticReport, ForensicVerdict, SchemaError, SchemaValidator,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::{BackendConfig, RetryPolicy};
use crate::providers::{
    ChatMessage, CompletionConfig, LlmProvider, ProviderError, TokenUsage,
};

/// A model output type: deserializable, schema-describable, and able to
/// check constraints its schema cannot express.
pub trait StructuredOutput: DeserializeOwned + JsonSchema + Send + 'static {
    /// Semantic checks run after deserialization. The error text is shown
    /// to the model on retry.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

impl StructuredOutput for CriticReport {
    fn check(&self) -> Result<(), String> {
        self.semantic_check()
    }
}

impl StructuredOutput for ForensicVerdict {
    fn check(&self) -> Result<(), String> {
        self.semantic_check()
    }
}

/// The two ways a structured generation fails.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("[{request_id}] {backend} ({model}) failed permanently: {source}")]
    Fatal {
        request_id: String,
        backend: String,
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("[{request_id}] {model} failed after {attempts} attempts. Last error: {last_error}")]
    Exhausted {
        request_id: String,
        model: String,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    InvalidSchema(#[from] SchemaError),
}

impl GatewayError {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            GatewayError::Fatal { request_id, .. } | GatewayError::Exhausted { request_id, .. } => {
                Some(request_id)
            }
            GatewayError::InvalidSchema(_) => None,
        }
    }
}

/// Result of one attempt.
#[derive(Debug)]
enum AttemptOutcome<T> {
    Success(T, TokenUsage),
    Retryable(ProviderError),
    Fatal(ProviderError),
    Parsing(String),
    Schema(String),
}

impl<T> AttemptOutcome<T> {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(..) => "success",
            AttemptOutcome::Retryable(_) => "retryable",
            AttemptOutcome::Fatal(_) => "fatal",
            AttemptOutcome::Parsing(_) => "parsing",
            AttemptOutcome::Schema(_) => "schema",
        }
    }
}

/// Structured-output front end for one backend.
#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("backend", &self.provider.name())
            .field("model", &self.completion.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ModelGateway {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        completion: CompletionConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            completion,
            retry,
        }
    }

    pub fn from_backend(
        provider: Arc<dyn LlmProvider>,
        backend: &BackendConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self::new(provider, CompletionConfig::from(backend), retry)
    }

    pub fn backend(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.completion.model
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Generate a value of type `T`.
    pub async fn generate<T: StructuredOutput>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<T, GatewayError> {
        let request_id = new_request_id();
        let validator = SchemaValidator::for_type::<T>()?;
        let system = format!("{system_prompt}\n\n{}", schema_instructions::<T>());
        let max_attempts = self.retry.max_attempts.max(1);

        let mut correction: Option<String> = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let user = match &correction {
                Some(err) => format!(
                    "{user_prompt}{}",
                    correction_block(attempt, max_attempts, err)
                ),
                None => user_prompt.to_string(),
            };

            let outcome = self
                .attempt::<T>(&system, &user, &validator, &request_id)
                .await;

            debug!(
                request_id = %request_id,
                backend = self.backend(),
                model = self.model(),
                output = validator.type_name(),
                attempt,
                outcome = outcome.label(),
                "Model attempt finished"
            );

            match outcome {
                AttemptOutcome::Success(value, usage) => {
                    info!(
                        request_id = %request_id,
                        backend = self.backend(),
                        model = self.model(),
                        attempt,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        total_tokens = usage.total(),
                        "Structured generation succeeded"
                    );
                    return Ok(value);
                }
                AttemptOutcome::Fatal(source) => {
                    error!(
                        request_id = %request_id,
                        backend = self.backend(),
                        model = self.model(),
                        attempt,
                        error = %source,
                        "Fatal model error"
                    );
                    return Err(GatewayError::Fatal {
                        request_id,
                        backend: self.backend().to_string(),
                        model: self.model().to_string(),
                        source,
                    });
                }
                AttemptOutcome::Retryable(err) => {
                    warn!(
                        request_id = %request_id,
                        backend = self.backend(),
                        model = self.model(),
                        attempt,
                        max_attempts,
                        error = %err,
                        "Transient model error"
                    );
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        let delay = self.backoff(attempt, err.retry_after());
                        debug!(request_id = %request_id, delay_ms = delay.as_millis() as u64, "Backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
                AttemptOutcome::Parsing(message) | AttemptOutcome::Schema(message) => {
                    warn!(
                        request_id = %request_id,
                        backend = self.backend(),
                        model = self.model(),
                        attempt,
                        max_attempts,
                        error = %message,
                        "Invalid model output"
                    );
                    last_error = message.clone();
                    correction = Some(message);
                }
            }
        }

        error!(
            request_id = %request_id,
            backend = self.backend(),
            model = self.model(),
            attempts = max_attempts,
            last_error = %last_error,
            "Model retries exhausted"
        );

        Err(GatewayError::Exhausted {
            request_id,
            model: self.model().to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt<T: StructuredOutput>(
        &self,
        system: &str,
        user: &str,
        validator: &SchemaValidator,
        request_id: &str,
    ) -> AttemptOutcome<T> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let call = self.provider.complete(messages, &self.completion);

        let response = match tokio::time::timeout(self.completion.timeout, call).await {
            Err(_) => return AttemptOutcome::Retryable(ProviderError::Timeout(self.completion.timeout)),
            Ok(Err(err)) if err.is_retryable() => return AttemptOutcome::Retryable(err),
            Ok(Err(err)) => return AttemptOutcome::Fatal(err),
            Ok(Ok(response)) => response,
        };

        trace!(
            request_id = %request_id,
            raw = %extract::preview(&response.content),
            "Raw model output"
        );

        let value = match extract_json(&response.content) {
            Ok(value) => value,
            Err(ExtractError::Empty) => {
                return AttemptOutcome::Retryable(ProviderError::EmptyResponse)
            }
            Err(err) => return AttemptOutcome::Parsing(err.to_string()),
        };

        if let Err(errors) = validator.validate(&value) {
            return AttemptOutcome::Schema(format!(
                "Schema validation failed: {}",
                errors.join("; ")
            ));
        }

        let parsed: T = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(err) => return AttemptOutcome::Schema(format!("Schema validation failed: {err}")),
        };

        if let Err(message) = parsed.check() {
            return AttemptOutcome::Schema(format!("Schema validation failed: {message}"));
        }

        AttemptOutcome::Success(parsed, response.usage)
    }

    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.retry.delay_for(attempt);
        match retry_after {
            Some(requested) if requested > computed => requested,
            _ => computed,
        }
    }
}

/// Eight hex characters, enough to correlate log lines of one call.
fn new_request_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect()
}

fn correction_block(attempt: u32, max_attempts: u32, error: &str) -> String {
    format!(
        "\n\n--- CORRECTION (attempt {attempt}/{max_attempts}) ---\n\
         Your previous response was invalid.\n\
         Error: {error}\n\
         Return ONLY valid JSON matching the schema."
    )
}

/// Output rules and the schema of `T`, appended to every system prompt.
pub fn schema_instructions<T: JsonSchema>() -> String {
    format!(
        "## Output Format\n\n\
         Respond with a single JSON object conforming to this JSON Schema:\n\n\
         {}\n\n\
         Rules:\n\
         - Output ONLY the JSON object. No prose before or after it.\n\
         - Do NOT wrap the JSON in markdown code fences.\n\
         - Include every required field.\n\
         - Use enum values exactly as written in the schema.\n\
         - Do NOT include internal reasoning or chain-of-thought.",
        schema_text::<T>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionResponse;
    use crate::testing::ScriptedProvider as Scripted;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Sample {
        name: String,
        #[schemars(range(max = 10))]
        score: u8,
    }

    impl StructuredOutput for Sample {
        fn check(&self) -> Result<(), String> {
            if self.name == "bad" {
                Err("name: must not be 'bad'".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct Hanging;

    #[async_trait]
    impl LlmProvider for Hanging {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::EmptyResponse)
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn gateway(provider: Arc<dyn LlmProvider>, max_attempts: u32) -> ModelGateway {
        ModelGateway::new(
            provider,
            CompletionConfig {
                model: "test-model".to_string(),
                timeout: Duration::from_secs(30),
                ..CompletionConfig::default()
            },
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_secs(1),
            },
        )
    }

    const VALID: &str = r#"{"name": "case", "score": 4}"#;

    #[tokio::test]
    async fn test_first_attempt_success() {
        let provider = Scripted::new(vec![Ok(VALID)]);
        let sample: Sample = gateway(provider.clone(), 3)
            .generate("You audit.", "Input")
            .await
            .unwrap();

        assert_eq!(sample, Sample { name: "case".into(), score: 4 });
        assert_eq!(provider.calls(), 1);

        let system = provider.system_prompt(0);
        assert!(system.starts_with("You audit."));
        assert!(system.contains("\"score\""));
        assert!(system.contains("Output ONLY the JSON object"));
        assert_eq!(provider.user_prompt(0), "Input");
    }

    #[tokio::test]
    async fn test_fenced_output_accepted() {
        let provider = Scripted::new(vec![Ok("```json\n{\"name\": \"x\", \"score\": 1}\n```")]);
        let sample: Sample = gateway(provider, 3).generate("s", "u").await.unwrap();
        assert_eq!(sample.score, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_feeds_correction() {
        let provider = Scripted::new(vec![Ok("I think the score is four."), Ok(VALID)]);
        let sample: Sample = gateway(provider.clone(), 3).generate("s", "Input").await.unwrap();

        assert_eq!(sample.score, 4);
        assert_eq!(provider.calls(), 2);
        let retry_prompt = provider.user_prompt(1);
        assert!(retry_prompt.starts_with("Input"));
        assert!(retry_prompt.contains("--- CORRECTION (attempt 2/3) ---"));
        assert!(retry_prompt.contains("No valid JSON found in model output"));
        assert!(retry_prompt.contains("Return ONLY valid JSON matching the schema."));
    }

    #[tokio::test]
    async fn test_schema_violation_reports_field() {
        let provider = Scripted::new(vec![Ok(r#"{"name": "x", "score": 42}"#), Ok(VALID)]);
        let _: Sample = gateway(provider.clone(), 3).generate("s", "u").await.unwrap();

        let retry_prompt = provider.user_prompt(1);
        assert!(retry_prompt.contains("Schema validation failed: score:"), "{retry_prompt}");
    }

    #[tokio::test]
    async fn test_semantic_check_failure_retries() {
        let provider = Scripted::new(vec![Ok(r#"{"name": "bad", "score": 1}"#), Ok(VALID)]);
        let _: Sample = gateway(provider.clone(), 3).generate("s", "u").await.unwrap();
        assert!(provider.user_prompt(1).contains("name: must not be 'bad'"));
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_error() {
        let provider = Scripted::new(vec![Ok("nope"), Ok("still nope"), Ok(r#"{"name": 1}"#)]);
        let err = gateway(provider.clone(), 3)
            .generate::<Sample>("s", "u")
            .await
            .unwrap_err();

        match &err {
            GatewayError::Exhausted {
                request_id,
                model,
                attempts,
                last_error,
            } => {
                assert_eq!(request_id.len(), 8);
                assert!(request_id.chars().all(|c| c.is_ascii_hexdigit()));
                assert_eq!(model, "test-model");
                assert_eq!(*attempts, 3);
                assert!(last_error.starts_with("Schema validation failed"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(provider.calls(), 3);
        assert!(provider.user_prompt(2).contains("(attempt 3/3)"));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_immediately() {
        let provider = Scripted::new(vec![
            Err(ProviderError::AuthError("invalid key".into())),
            Ok(VALID),
        ]);
        let err = gateway(provider.clone(), 3)
            .generate::<Sample>("s", "u")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Fatal { ref backend, .. } if backend == "scripted"));
        assert!(err.request_id().is_some());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_back_off_exponentially() {
        let provider = Scripted::new(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            Err(ProviderError::HttpError("connection reset".into())),
            Ok(VALID),
        ]);
        let start = tokio::time::Instant::now();
        let _: Sample = gateway(provider.clone(), 3).generate("s", "u").await.unwrap();

        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(!provider.user_prompt(1).contains("CORRECTION"));
        assert!(!provider.user_prompt(2).contains("CORRECTION"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_honoured() {
        let provider = Scripted::new(vec![
            Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(10)),
            }),
            Ok(VALID),
        ]);
        let start = tokio::time::Instant::now();
        let _: Sample = gateway(provider, 3).generate("s", "u").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_final_attempt() {
        let provider = Scripted::new(vec![
            Err(ProviderError::Timeout(Duration::from_secs(30))),
            Err(ProviderError::Timeout(Duration::from_secs(30))),
            Err(ProviderError::Timeout(Duration::from_secs(30))),
        ]);
        let start = tokio::time::Instant::now();
        let err = gateway(provider, 3).generate::<Sample>("s", "u").await.unwrap_err();

        assert!(matches!(err, GatewayError::Exhausted { attempts: 3, .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let err = gateway(Arc::new(Hanging), 1)
            .generate::<Sample>("s", "u")
            .await
            .unwrap_err();

        match err {
            GatewayError::Exhausted { last_error, .. } => assert!(last_error.contains("Timeout")),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_text_is_transient() {
        let provider = Scripted::new(vec![Ok("   "), Ok(VALID)]);
        let _: Sample = gateway(provider.clone(), 2).generate("s", "u").await.unwrap();
        assert!(!provider.user_prompt(1).contains("CORRECTION"));
    }
}
