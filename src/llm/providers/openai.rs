//! OpenAI chat-completions provider
//!
//! Talks to any endpoint that speaks the `/chat/completions` wire format.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, TokenUsage,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Delays between attempts; the first attempt is immediate
const RETRY_BACKOFF_MS: [u64; 3] = [100, 200, 400];

/// OpenAI provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// OpenAI provider implementation
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn to_wire_request(request: &CompletionRequest) -> ChatRequest {
        ChatRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn parse_response(
        response: ChatResponse,
        metadata: HashMap<String, String>,
    ) -> Result<CompletionResponse, LlmError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices returned".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            model: response.model,
            usage: TokenUsage {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
            },
            finish_reason: Self::convert_finish_reason(choice.finish_reason.as_deref()),
            metadata,
        })
    }

    fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::NetworkError(_) | LlmError::RateLimitExceeded(_) | LlmError::ApiError(_)
        )
    }

    async fn complete_with_retry(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let mut last_error = None;

        for (attempt, delay_ms) in std::iter::once(0u64)
            .chain(RETRY_BACKOFF_MS.iter().copied())
            .enumerate()
        {
            if attempt > 0 {
                debug!(attempt, delay_ms, "Retrying OpenAI request");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.send(request).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_retryable(&e) => {
                    warn!(attempt = attempt + 1, error = %e, "OpenAI request attempt failed");
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(error = %e, "Non-retryable OpenAI error");
                    return Err(e);
                }
            }
        }

        error!("OpenAI request failed after all retries");
        Err(last_error
            .unwrap_or_else(|| LlmError::NetworkError("All retry attempts failed".to_string())))
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                LlmError::NetworkError(format!(
                    "HTTP request failed: {e} (is_connect: {}, is_timeout: {})",
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LlmError::AuthenticationFailed(format!("{status} - {body}"))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    LlmError::RateLimitExceeded(format!("{status} - {body}"))
                }
                s if s.is_server_error() => {
                    LlmError::ApiError(format!("OpenAI server error: {status} - {body}"))
                }
                _ => LlmError::RequestFailed(format!("OpenAI rejected request: {status} - {body}")),
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let wire = Self::to_wire_request(&request);
        debug!(
            model = %wire.model,
            messages = wire.messages.len(),
            "Sending OpenAI completion request"
        );

        let response = self.complete_with_retry(&wire).await?;
        let response = Self::parse_response(response, request.metadata)?;

        debug!(
            total_tokens = response.usage.total_tokens,
            finish_reason = ?response.finish_reason,
            "OpenAI completion received"
        );
        Ok(response)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::AuthenticationFailed(format!(
                "OpenAI health check returned {}",
                response.status()
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: Some(message.content.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(OpenAiConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let result = OpenAiProvider::new(OpenAiConfig::default());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: "k".to_string(),
            base_url: "http://localhost:9999/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            provider.endpoint("chat/completions"),
            "http://localhost:9999/v1/chat/completions"
        );
        assert_eq!(self::provider().name(), "openai");
    }

    #[test]
    fn test_finish_reason_conversion() {
        assert_eq!(
            OpenAiProvider::convert_finish_reason(Some("stop")),
            FinishReason::Stop
        );
        assert_eq!(
            OpenAiProvider::convert_finish_reason(Some("length")),
            FinishReason::Length
        );
        assert_eq!(
            OpenAiProvider::convert_finish_reason(Some("content_filter")),
            FinishReason::ContentFilter
        );
        assert_eq!(
            OpenAiProvider::convert_finish_reason(None),
            FinishReason::Error
        );
    }

    #[test]
    fn test_wire_request_omits_unset_parameters() {
        let request = CompletionRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: Some(0.2),
            metadata: HashMap::new(),
        };

        let json = serde_json::to_value(OpenAiProvider::to_wire_request(&request)).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_some());
    }

    #[test]
    fn test_parse_response_without_choices_is_invalid() {
        let response = ChatResponse {
            model: "m".to_string(),
            choices: vec![],
            usage: ChatUsage::default(),
        };
        assert!(matches!(
            OpenAiProvider::parse_response(response, HashMap::new()),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(OpenAiProvider::is_retryable(&LlmError::NetworkError(
            "x".into()
        )));
        assert!(OpenAiProvider::is_retryable(&LlmError::RateLimitExceeded(
            "x".into()
        )));
        assert!(!OpenAiProvider::is_retryable(
            &LlmError::AuthenticationFailed("x".into())
        ));
        assert!(!OpenAiProvider::is_retryable(&LlmError::RequestFailed(
            "x".into()
        )));
    }
}
