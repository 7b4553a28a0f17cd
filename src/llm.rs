//! LLM client abstraction and the Anthropic Messages API implementation.
//!
//! Every generation goes through [`LlmClient::complete`]: one system
//! instruction, one user message, one response string. There is no streaming
//! and no retry; a failed call fails the operation that made it.
//!
//! [`create_llm`] returns an [`AnthropicClient`] when `ANTHROPIC_API_KEY` is
//! set and a [`DisabledLlm`] otherwise, so the server can start (and report
//! itself unconfigured on `/health`) without a key.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;

/// Value of the `anthropic-version` request header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable holding the Anthropic API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    /// The user message.
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Whether a credential is present. Reported on `/health`.
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

// ============ Anthropic ============

pub struct AnthropicClient {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            model: config.model.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: builder.build()?,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Concatenate the text blocks of a Messages API response.
fn response_text(body: &str) -> Result<String> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Invalid Anthropic response: {}", e))?;

    let text: String = parsed
        .content
        .into_iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text)
        .collect();

    if text.is_empty() {
        bail!("Anthropic response contained no text content");
    }
    Ok(text)
}

fn error_message(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => anyhow!(
            "Anthropic API error {}: {} ({})",
            status,
            err.error.message,
            err.error.error_type
        ),
        Err(_) => anyhow!("Anthropic API error {}: {}", status, body),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        debug!(model = %self.model, prompt_chars = request.prompt.len(), "calling Anthropic");

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Anthropic request failed: {}", e))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(error_message(status, &text));
        }

        let answer = response_text(&text)?;
        debug!(response_chars = answer.len(), "Anthropic response received");
        Ok(answer)
    }
}

// ============ Disabled ============

/// Stand-in used when no API key is configured. Every call fails.
pub struct DisabledLlm {
    model: String,
}

impl DisabledLlm {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for DisabledLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("LLM client not configured: set {}", API_KEY_ENV)
    }
}

/// Build the LLM client from configuration and the environment.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(Arc::new(AnthropicClient::new(config, key)?)),
        _ => Ok(Arc::new(DisabledLlm::new(config.model.clone()))),
    }
}

/// Canned client for unit tests: returns a fixed response and records every
/// request it receives.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    pub(crate) struct CannedLlm {
        response: std::result::Result<String, String>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedLlm {
        pub(crate) fn replying(response: impl Into<String>) -> Self {
            Self {
                response: Ok(response.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: impl Into<String>) -> Self {
            Self {
                response: Err(message.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(anyhow!(message.clone())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_concatenates_text_blocks() {
        let body = r#"{"content":[{"type":"text","text":"Hello, "},{"type":"tool_use","id":"x"},{"type":"text","text":"world"}]}"#;
        assert_eq!(response_text(body).unwrap(), "Hello, world");
    }

    #[test]
    fn test_response_without_text_is_error() {
        assert!(response_text(r#"{"content":[]}"#).is_err());
        assert!(response_text("not json").is_err());
    }

    #[test]
    fn test_error_message_uses_api_error_body() {
        let err = error_message(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        );
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("invalid x-api-key"));
    }

    #[test]
    fn test_messages_url_strips_trailing_slash() {
        let config = LlmConfig {
            url: "http://127.0.0.1:9999/".to_string(),
            ..LlmConfig::default()
        };
        let client = AnthropicClient::new(&config, "key").unwrap();
        assert_eq!(client.messages_url(), "http://127.0.0.1:9999/v1/messages");
    }

    #[tokio::test]
    async fn test_disabled_llm_fails() {
        let llm = DisabledLlm::new("claude");
        assert!(!llm.is_configured());
        let err = llm
            .complete(&CompletionRequest {
                system: None,
                prompt: "hi".to_string(),
                temperature: 0.0,
                max_tokens: 10,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
