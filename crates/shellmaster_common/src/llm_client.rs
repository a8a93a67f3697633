//! Generation backend abstraction.
//!
//! The pipeline only needs `generate(prompt) -> text`. `HttpLlmClient` talks
//! to any OpenAI-compatible `/chat/completions` endpoint (vLLM, llama.cpp
//! server, Ollama's `/v1`); `FakeLlmClient` replays scripted responses for
//! tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::BackendConfig;
use crate::prompts::Prompt;

/// LLM errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// Text generation backend
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a completion for `prompt`. Dropping the future aborts the call.
    async fn generate(&self, prompt: &Prompt) -> Result<String, LlmError>;

    /// Model identifier, for the trace
    fn model_id(&self) -> &str;
}

/// OpenAI-compatible HTTP client
pub struct HttpLlmClient {
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(config: &BackendConfig, timeout: Duration) -> Result<Self, LlmError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if !config.use_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(|e| LlmError::Client(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
            client,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout.as_secs())
        } else {
            LlmError::HttpError(format!("Request failed: {}", e))
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpLlmClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": 0.0,
        });

        debug!(url = %url, model = %self.model, "calling generation backend");

        let mut request = self.client.post(&url).json(&request_body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        // Extract content from OpenAI format
        let text = response_json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .ok_or(LlmError::EmptyResponse)?;

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Fake LLM client for testing
///
/// Responses are consumed in order; the last one repeats once the queue
/// has a single entry left. Every prompt is recorded.
pub struct FakeLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<Prompt>>,
    delay: Option<Duration>,
}

impl FakeLlmClient {
    /// Create a fake client with pre-defined responses
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Create a fake client that always returns `text`
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(text.into())])
    }

    /// Create a fake client that always returns an error
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Sleep before answering (uses the tokio clock, so paused tests are instant)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of calls made
    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> Result<String, LlmError> {
        let mut responses = match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match responses.len() {
            0 => Err(LlmError::EmptyResponse),
            // Keep returning the same response
            1 => responses[0].clone(),
            _ => responses.pop_front().unwrap_or(Err(LlmError::EmptyResponse)),
        }
    }
}

#[async_trait]
impl GenerationBackend for FakeLlmClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response()
    }

    fn model_id(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> Prompt {
        Prompt {
            system: "system".to_string(),
            user: "user".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fake_client_always() {
        let client = FakeLlmClient::always("ls -la");

        assert_eq!(client.generate(&prompt()).await.unwrap(), "ls -la");
        assert_eq!(client.generate(&prompt()).await.unwrap(), "ls -la");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fake_client_always_error() {
        let client = FakeLlmClient::always_error(LlmError::Timeout(60));

        let result = client.generate(&prompt()).await;
        assert_eq!(result, Err(LlmError::Timeout(60)));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fake_client_multiple_responses() {
        let client = FakeLlmClient::new(vec![
            Ok("first".to_string()),
            Err(LlmError::HttpError("boom".to_string())),
            Ok("last".to_string()),
        ]);

        assert_eq!(client.generate(&prompt()).await.unwrap(), "first");
        assert!(client.generate(&prompt()).await.is_err());
        assert_eq!(client.generate(&prompt()).await.unwrap(), "last");
        assert_eq!(client.generate(&prompt()).await.unwrap(), "last");
        assert_eq!(client.prompts()[0].user, "user");
    }

    #[tokio::test]
    async fn test_http_client_unreachable_is_error() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            ..Default::default()
        };
        let client = HttpLlmClient::new(&config, Duration::from_secs(2)).unwrap();
        assert_eq!(client.model_id(), "Qwen-7B");
        assert!(client.generate(&prompt()).await.is_err());
    }
}
