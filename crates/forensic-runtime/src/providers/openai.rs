//! OpenAI-compatible chat completions provider.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`:
//! Together, Groq, vLLM, Ollama and OpenAI itself. With `json_mode` the
//! request asks for `response_format = json_object`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    credentials::ApiCredential,
    http::{error_message, retry_after, send_error, status_error, LazyClient},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    client: LazyClient,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(credential: ApiCredential, base_url: impl Into<String>) -> Self {
        Self {
            credential,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: LazyClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let client = self.client.get()?;
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            response_format: config
                .json_mode
                .then_some(ResponseFormat { type_: "json_object" }),
        };

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, wait, error_message(&body)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            ..TokenUsage::default()
        });

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;
        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(CompletionResponse {
            content,
            usage: usage.unwrap_or_default(),
            model: body.model.unwrap_or_else(|| config.model.clone()),
            stop_reason: choice.finish_reason,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    async fn shutdown(&self) {
        if self.client.shutdown() {
            tracing::debug!(provider = "openai", "Closed HTTP client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(ApiCredential::new("llama-key"), format!("{}/v1/", server.uri()))
    }

    fn config() -> CompletionConfig {
        CompletionConfig::from(&crate::config::BackendConfig::auditor_default())
    }

    fn messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are a forensic auditor."),
            ChatMessage::user("Case file: {}"),
        ]
    }

    #[tokio::test]
    async fn test_successful_completion_requests_json_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer llama-key"))
            .and(body_partial_json(serde_json::json!({
                "response_format": {"type": "json_object"},
                "temperature": 0.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "meta-llama/Llama-3.2-3B-Instruct",
                "choices": [{"message": {"role": "assistant", "content": "{}"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 50, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;

        let response = provider(&server).complete(messages(), &config()).await.unwrap();
        assert_eq!(response.content, "{}");
        assert_eq!(response.usage.total(), 52);
        assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_no_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider(&server).complete(messages(), &config()).await.unwrap_err();
        assert_eq!(err, ProviderError::EmptyResponse);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_model_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"message": "Unable to access model llama-9", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).complete(messages(), &config()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::ApiError {
                status: 404,
                message: "Unable to access model llama-9".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = provider(&server).complete(messages(), &config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let provider = OpenAiProvider::new(ApiCredential::new("k"), "http://127.0.0.1:9");
        let err = provider.complete(messages(), &config()).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }
}
