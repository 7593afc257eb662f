//! OpenAI chat completions client

use crate::config::LlmConfig;
use crate::error::MemoryError;
use crate::llm::ChatModel;
use crate::memory::store::Turn;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(api_key: String, model: String) -> crate::Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> crate::Result<Self> {
        if api_key.trim().is_empty() {
            return Err(MemoryError::LlmError(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> crate::Result<Self> {
        Self::with_base_url(
            config.api_key.clone(),
            config.model.clone(),
            config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, turns: &[Turn], max_output_tokens: u32) -> crate::Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| RequestMessage {
                    role: t.role().as_str(),
                    content: t.content(),
                })
                .collect(),
            max_tokens: max_output_tokens,
            temperature: 0.0,
        };

        info!(model = %self.model, turns = turns.len(), "Calling OpenAI chat completions");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("OpenAI request failed: {}", e);
                MemoryError::LlmError(format!("OpenAI API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "OpenAI error response: {}", error_text);
            return Err(MemoryError::LlmError(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse OpenAI response: {}", e);
            MemoryError::LlmError(format!("OpenAI parse error: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| MemoryError::LlmError("Empty response from OpenAI".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 150,
                "messages": [{ "role": "user", "content": "Hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "Hi there!" },
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::with_base_url(
            "sk-test".to_string(),
            OpenAiClient::DEFAULT_MODEL.to_string(),
            server.uri(),
        )
        .unwrap();

        let answer = client
            .complete(&[Turn::user("Hello").unwrap()], 150)
            .await
            .unwrap();
        assert_eq!(answer, "Hi there!");
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let client = OpenAiClient::with_base_url(
            "sk-test".to_string(),
            OpenAiClient::DEFAULT_MODEL.to_string(),
            server.uri(),
        )
        .unwrap();

        let result = client.complete(&[Turn::user("Hello").unwrap()], 150).await;
        assert!(matches!(result, Err(MemoryError::LlmError(_))));
    }
}
