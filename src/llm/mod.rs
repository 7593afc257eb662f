//! Chat model providers
//!
//! Thin REST clients for the hosted models a session talks to. The memory
//! manager only sees them through the summarizer; sessions use them directly
//! to produce replies.

use crate::config::LlmConfig;
use crate::error::MemoryError;
use crate::memory::store::Turn;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// A hosted chat-completion model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation `turns`, returning the assistant reply text
    async fn complete(&self, turns: &[Turn], max_output_tokens: u32) -> Result<String>;

    /// Human-readable model name, used in logs and reports
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl FromStr for Provider {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" | "gpt" => Ok(Provider::OpenAi),
            other => Err(MemoryError::Config(format!(
                "Unknown LLM provider '{}' (expected gemini or openai)",
                other
            ))),
        }
    }
}

/// Build the configured chat model
pub fn build_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    let model: Arc<dyn ChatModel> = match config.provider {
        Provider::Gemini => Arc::new(GeminiClient::from_config(config)?),
        Provider::OpenAi => Arc::new(OpenAiClient::from_config(config)?),
    };
    Ok(model)
}
