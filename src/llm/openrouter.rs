//! OpenRouter API client implementation with optional retry for transient errors.
//!
//! Any OpenAI-compatible endpoint works; the base URL comes from [`LlmConfig`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{LlmError, RetryConfig};
use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenUsage};
use crate::config::LlmConfig;

/// Per-request ceiling for model calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// OpenRouter API client; retries transient errors when configured to.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry_config: RetryConfig,
}

impl OpenRouterClient {
    /// Create a client from the LLM section of the config.
    ///
    /// Retries only as many times as `config.max_retries` allows (default
    /// none, so a call is attempted once).
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        Self::with_retry_config(config, RetryConfig::with_max_retries(config.max_retries))
    }

    /// Create a client with custom retry configuration.
    pub fn with_retry_config(config: &LlmConfig, retry_config: RetryConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry_config,
        })
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn transport_error(e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::network_error(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::network_error(format!("Connection failed: {}", e))
        } else {
            LlmError::network_error(format!("Request failed: {}", e))
        }
    }

    /// Send one request and return the raw success body.
    async fn send_once(&self, request: reqwest::RequestBuilder) -> Result<String, LlmError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "quiz-solver")
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), body, retry_after));
        }
        Ok(body)
    }

    /// Run `make_request` until it succeeds, a permanent error occurs, or the
    /// retry budget is spent.
    async fn send_with_retry<F>(&self, make_request: F) -> Result<String, LlmError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.send_once(make_request()).await {
                Ok(body) => {
                    if attempt > 0 {
                        tracing::info!(
                            "LLM request succeeded after {} retries ({:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(body);
                }
                Err(error) => {
                    if !self.retry_config.should_retry(&error, attempt) {
                        tracing::warn!("LLM request failed (attempt {}): {}", attempt + 1, error);
                        return Err(error);
                    }

                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        tracing::warn!("LLM retry budget exhausted: {}", error);
                        return Err(error);
                    }
                    let delay = error.suggested_delay(attempt).min(remaining);

                    tracing::warn!(
                        "LLM attempt {} failed with {}, retrying in {:?}",
                        attempt + 1,
                        error.kind,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let request = CompletionRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!("Sending chat completion: model={}", model);

        let body = self
            .send_with_retry(|| self.client.post(&url).json(&request))
            .await?;

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))?;

        Ok(ChatResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason,
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: parsed.model.or_else(|| Some(model.to_string())),
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let body = self.send_with_retry(|| self.client.get(&url)).await?;

        let parsed: ModelsResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::parse_error(format!("Failed to parse model list: {}", e)))?;

        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

/// Chat completion request (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MODEL;
    use httpmock::prelude::*;

    fn llm_config(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: "test-key".to_string(),
            base_url,
            default_model: DEFAULT_MODEL.to_string(),
            model_preference: vec!["flash".to_string()],
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_chat_completion_parses_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_contains("\"role\":\"user\"");
                then.status(200).json_body(serde_json::json!({
                    "model": "google/gemini-2.0-flash-001",
                    "choices": [{"message": {"content": "result = 42"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
                }));
            })
            .await;

        let client =
            OpenRouterClient::with_retry_config(&llm_config(server.base_url()), RetryConfig::none())
                .unwrap();
        let response = client
            .chat_completion("any", &[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content.as_deref(), Some("result = 42"));
        assert_eq!(response.usage.unwrap().total_tokens, 13);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(404).body("model not found");
            })
            .await;

        let client = OpenRouterClient::new(&llm_config(server.base_url())).unwrap();
        let err = client
            .chat_completion("nope", &[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();

        assert_eq!(mock.hits_async().await, 1);
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_default_client_attempts_once() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("upstream overloaded");
            })
            .await;

        let client = OpenRouterClient::new(&llm_config(server.base_url())).unwrap();
        let err = client
            .chat_completion("any", &[ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap_err();

        assert_eq!(mock.hits_async().await, 1);
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_opt_in_retry_repeats_transient_failures() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(429).header("retry-after", "0").body("slow down");
            })
            .await;

        let mut config = llm_config(server.base_url());
        config.max_retries = 1;
        let client = OpenRouterClient::new(&config).unwrap();
        let _ = client
            .chat_completion("any", &[ChatMessage::user("hi")], ChatOptions::default())
            .await;

        assert_eq!(mock.hits_async().await, 2);
    }

    #[tokio::test]
    async fn test_list_models_returns_ids() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/models");
                then.status(200).json_body(serde_json::json!({
                    "data": [{"id": "openai/gpt-4o", "name": "GPT-4o"}, {"id": "google/gemini-2.0-flash-001"}]
                }));
            })
            .await;

        let client =
            OpenRouterClient::with_retry_config(&llm_config(server.base_url()), RetryConfig::none())
                .unwrap();
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["openai/gpt-4o", "google/gemini-2.0-flash-001"]);
    }
}
