//! Conversation summarization
//!
//! Compresses a run of turns into plain text by asking a chat model to
//! summarize it. The memory policies wrap the text into a summary turn.

use crate::error::MemoryError;
use crate::llm::ChatModel;
use crate::memory::store::{format_transcript, Turn};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Instruction prepended to the serialized turns
pub const SUMMARY_INSTRUCTION: &str = "Summarize the key points of this conversation concisely:";

/// Output cap for summary calls
pub const SUMMARY_MAX_TOKENS: u32 = 150;

/// Compresses an ordered run of turns into plain text
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Turn]) -> crate::Result<String>;
}

/// Summarizer backed by a hosted chat model
pub struct LlmSummarizer {
    model: Arc<dyn ChatModel>,
}

impl LlmSummarizer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// The single user message sent to the model
    pub fn build_prompt(turns: &[Turn]) -> String {
        format!("{}\n{}", SUMMARY_INSTRUCTION, format_transcript(turns))
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> crate::Result<String> {
        if turns.is_empty() {
            return Err(MemoryError::Summarization(
                "Cannot summarize empty turn list".to_string(),
            ));
        }

        let prompt = Turn::user(Self::build_prompt(turns))?;

        info!(
            model = self.model.name(),
            turns = turns.len(),
            "Summarizing conversation"
        );

        match self.model.complete(&[prompt], SUMMARY_MAX_TOKENS).await {
            Ok(summary) if !summary.trim().is_empty() => Ok(summary.trim().to_string()),
            Ok(_) => Err(MemoryError::Summarization(
                "Model returned an empty summary".to_string(),
            )),
            Err(e) => {
                warn!("Failed to summarize conversation: {}", e);
                Err(MemoryError::Summarization(e.to_string()))
            }
        }
    }
}
