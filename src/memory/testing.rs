//! Test doubles for the memory collaborators

use crate::error::MemoryError;
use crate::llm::ChatModel;
use crate::memory::store::{ConversationLog, Role, Turn};
use crate::memory::summarizer::Summarizer;
use crate::memory::tokens::TokenCounter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One token per character
pub struct CharTokenCounter;

impl TokenCounter for CharTokenCounter {
    fn count(&self, turn: &Turn) -> crate::Result<usize> {
        Ok(turn.content().chars().count())
    }
}

pub struct FailingTokenCounter;

impl TokenCounter for FailingTokenCounter {
    fn count(&self, _turn: &Turn) -> crate::Result<usize> {
        Err(MemoryError::Tokenizer("tokenizer offline".to_string()))
    }
}

/// Returns a fixed summary and records every input it was given
pub struct RecordingSummarizer {
    summary: String,
    inputs: Mutex<Vec<Vec<Turn>>>,
}

impl RecordingSummarizer {
    pub fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn inputs(&self) -> Vec<Vec<Turn>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

#[async_trait]
impl Summarizer for RecordingSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> crate::Result<String> {
        self.inputs.lock().unwrap().push(turns.to_vec());
        Ok(self.summary.clone())
    }
}

pub struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _turns: &[Turn]) -> crate::Result<String> {
        Err(MemoryError::Summarization("service unavailable".to_string()))
    }
}

/// Never finishes inside any reasonable deadline
pub struct StalledSummarizer;

#[async_trait]
impl Summarizer for StalledSummarizer {
    async fn summarize(&self, _turns: &[Turn]) -> crate::Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }
}

/// Chat model that replies with a fixed text (or fails) and records calls
pub struct ScriptedModel {
    reply: Option<String>,
    calls: Mutex<Vec<(Vec<Turn>, u32)>>,
    count: AtomicUsize,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<Turn>, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, turns: &[Turn], max_output_tokens: u32) -> crate::Result<String> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((turns.to_vec(), max_output_tokens));
        self.reply
            .clone()
            .ok_or_else(|| MemoryError::LlmError("model offline".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Alternating user/assistant log whose turn contents are `turn {i}`
pub fn numbered_log(len: usize) -> ConversationLog {
    let mut log = ConversationLog::new();
    for i in 0..len {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        log.push(Turn::new(role, format!("turn {}", i)).unwrap());
    }
    log
}

/// Log whose turns cost exactly `costs[i]` tokens under `CharTokenCounter`
pub fn costed_log(costs: &[usize]) -> ConversationLog {
    let mut log = ConversationLog::new();
    for (i, cost) in costs.iter().enumerate() {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        log.push(Turn::new(role, "x".repeat(*cost)).unwrap());
    }
    log
}
