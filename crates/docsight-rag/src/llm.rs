//! LLM Client implementations
//!
//! Provides OpenAI-compatible and Ollama chat backends with both
//! one-shot and streaming responses.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use docsight_core::{DocsightError, LlmClient, LlmConfig, LlmProvider, Result};
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| DocsightError::Config(format!("Failed to build HTTP client: {e}")))
}

// ============================================================================
// OpenAI Client
// ============================================================================

/// OpenAI-compatible chat completions client
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Create from config; requires a usable credential
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|_| config.is_configured())
            .ok_or_else(|| DocsightError::Config("OpenAI API key required".to_string()))?;

        let client = Self {
            client: http_client(config.timeout_secs)?,
            ..Self::new(
                api_key.clone(),
                config.model.clone(),
                config.max_tokens,
                config.temperature,
            )
        };

        Ok(match &config.base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        })
    }

    /// Set custom base URL (OpenRouter or other compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request<'a>(&'a self, prompt: &'a str, stream: Option<bool>) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| DocsightError::Backend(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocsightError::Backend(format!(
                "OpenAI error ({status}): {error_text}"
            )));
        }
        Ok(response)
    }
}

/// Concatenate the content deltas of one SSE payload
fn parse_sse_chunk(text: &str) -> String {
    let mut content = String::new();
    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            continue;
        }
        if let Ok(parsed) = serde_json::from_str::<StreamResponse>(data) {
            if let Some(delta) = parsed.choices.first().and_then(|c| c.delta.content.as_ref()) {
                content.push_str(delta);
            }
        }
    }
    content
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.send(&self.request(prompt, None)).await?;

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| DocsightError::Backend(format!("Failed to parse response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DocsightError::Backend("No response generated".to_string()))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.send(&self.request(prompt, Some(true))).await?;

        let mapped_stream = response.bytes_stream().filter_map(|result| async move {
            match result {
                Ok(bytes) => {
                    let content = parse_sse_chunk(&String::from_utf8_lossy(&bytes));
                    (!content.is_empty()).then_some(Ok(content))
                }
                Err(e) => Some(Err(DocsightError::Backend(format!("Stream error: {e}")))),
            }
        });

        Ok(Box::pin(mapped_stream))
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            ..Self::new(config.ollama_url.clone(), config.model.clone())
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| DocsightError::Backend(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocsightError::Backend(format!("Ollama error: {error_text}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let result: OllamaResponse = self
            .send(prompt, false)
            .await?
            .json()
            .await
            .map_err(|e| DocsightError::Backend(format!("Failed to parse Ollama response: {e}")))?;

        Ok(result.response)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.send(prompt, true).await?;

        let mapped_stream = response.bytes_stream().filter_map(|result| async move {
            match result {
                Ok(bytes) => {
                    // One JSON object per line
                    let content: String = String::from_utf8_lossy(&bytes)
                        .lines()
                        .filter_map(|line| serde_json::from_str::<OllamaResponse>(line).ok())
                        .map(|parsed| parsed.response)
                        .collect();
                    (!content.is_empty()).then_some(Ok(content))
                }
                Err(e) => Some(Err(DocsightError::Backend(format!("Stream error: {e}")))),
            }
        });

        Ok(Box::pin(mapped_stream))
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an LLM client from config
pub fn create_llm_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider {
        LlmProvider::OpenAI => Ok(Box::new(OpenAiClient::from_config(config)?)),
        LlmProvider::Ollama => Ok(Box::new(OllamaClient::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_client_from_config() {
        let config = LlmConfig {
            api_key: Some("sk-test-0123456789".to_string()),
            base_url: Some("https://openrouter.ai/api/v1/".to_string()),
            model: "gpt-4o-mini".to_string(),
            ..LlmConfig::default()
        };
        let client = OpenAiClient::from_config(&config).unwrap();
        assert_eq!(client.model, "gpt-4o-mini");
        assert_eq!(client.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_openai_client_rejects_placeholder_key() {
        let config = LlmConfig {
            api_key: Some("sk-your-openai-api-key-here".to_string()),
            ..LlmConfig::default()
        };
        assert!(matches!(
            OpenAiClient::from_config(&config),
            Err(DocsightError::Config(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let client = OpenAiClient::new("k", "gpt-3.5-turbo", 2000, 0.1);
        let json = serde_json::to_value(client.request("hi", None)).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn test_parse_sse_chunk() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                       data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                       data: [DONE]\n";
        assert_eq!(parse_sse_chunk(payload), "Hello");
        assert_eq!(parse_sse_chunk("data: [DONE]"), "");
    }

    #[test]
    fn test_ollama_client_creation() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3");
        assert_eq!(client.model, "llama3");
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
