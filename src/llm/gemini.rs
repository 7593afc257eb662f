//! Gemini API client
//!
//! Multi-turn `generateContent` calls. Uses a long-lived reqwest::Client for
//! connection pooling.

use crate::config::LlmConfig;
use crate::error::MemoryError;
use crate::llm::ChatModel;
use crate::memory::store::{Role, Turn};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> crate::Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> crate::Result<Self> {
        if api_key.trim().is_empty() {
            return Err(MemoryError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
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

    /// Carries no credentials; transport errors print this URL
    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, turns: &[Turn], max_output_tokens: u32) -> crate::Result<String> {
        let request = build_request(turns, max_output_tokens);

        info!(model = %self.model, turns = turns.len(), "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("Gemini API request failed: {}", e);
                MemoryError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(MemoryError::LlmError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            MemoryError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| MemoryError::LlmError("Empty response from Gemini".to_string()))?;

        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Gemini has no system role inside `contents`; system turns (including the
/// summary turn) go into `systemInstruction`.
fn build_request(turns: &[Turn], max_output_tokens: u32) -> GeminiRequest {
    let mut contents = Vec::with_capacity(turns.len());
    let mut system_parts = Vec::new();

    for turn in turns {
        match turn.role() {
            Role::System => system_parts.push(Part {
                text: turn.content().to_string(),
            }),
            Role::User | Role::Assistant => contents.push(Content {
                role: Some(gemini_role(turn.role()).to_string()),
                parts: vec![Part {
                    text: turn.content().to_string(),
                }],
            }),
        }
    }

    GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            temperature: 0.0,
            max_output_tokens,
        },
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: system_parts,
            })
        },
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        _ => "model",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_turns() -> Vec<Turn> {
        vec![
            Turn::summary("Earlier the user asked about embeddings").unwrap(),
            Turn::user("What is a vector store?").unwrap(),
            Turn::assistant("A database for embeddings.").unwrap(),
            Turn::user("Name one.").unwrap(),
        ]
    }

    #[test]
    fn test_request_serialization() {
        let request = build_request(&sample_turns(), 150);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 150);
        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "Earlier the user asked about embeddings"
        );
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "Chroma." }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(
            "test-key".to_string(),
            "gemini-2.0-flash".to_string(),
            server.uri(),
        )
        .unwrap();

        let answer = client.complete(&sample_turns(), 256).await.unwrap();
        assert_eq!(answer, "Chroma.");
    }

    #[tokio::test]
    async fn test_error_status_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = GeminiClient::with_base_url(
            "test-key".to_string(),
            "gemini-2.0-flash".to_string(),
            server.uri(),
        )
        .unwrap();

        let err = client.complete(&sample_turns(), 256).await.unwrap_err();
        assert!(matches!(err, MemoryError::LlmError(ref msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        // Nothing listens on port 1, so the send itself fails
        let client = GeminiClient::with_base_url(
            "SECRET-KEY-123".to_string(),
            "gemini-2.0-flash".to_string(),
            "http://127.0.0.1:1".to_string(),
        )
        .unwrap();

        let err = client.complete(&sample_turns(), 256).await.unwrap_err();

        assert!(matches!(err, MemoryError::LlmError(_)));
        assert!(!err.to_string().contains("SECRET-KEY-123"));
        assert!(!format!("{:?}", err).contains("SECRET-KEY-123"));
    }

    #[test]
    fn test_endpoint_has_no_credentials() {
        let client = GeminiClient::with_base_url(
            "SECRET-KEY-123".to_string(),
            "gemini-2.0-flash".to_string(),
            "http://localhost/".to_string(),
        )
        .unwrap();

        assert_eq!(
            client.endpoint(),
            "http://localhost/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_missing_api_key() {
        let result = GeminiClient::new(String::new(), "gemini-2.0-flash".to_string());
        assert!(result.is_err());
    }
}
