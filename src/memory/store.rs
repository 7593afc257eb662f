//! Conversation log storage
//!
//! Turns and the ordered, append-only log a conversation session owns

use crate::error::MemoryError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the conversation
///
/// Role and content are fixed at creation; fields are only exposed through
/// accessors so a turn cannot be edited in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    turn_id: Uuid,
    timestamp: DateTime<Utc>,
    role: Role,
    content: String,
    /// Synthetic system turn carrying an accumulated summary
    is_summary: bool,
}

impl Turn {
    /// Create a new turn. Empty or whitespace-only content is rejected.
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidTurn(format!(
                "{} turn content must not be empty",
                role
            )));
        }

        Ok(Self {
            turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content,
            is_summary: false,
        })
    }

    pub fn user(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Result<Self> {
        Self::new(Role::Assistant, content)
    }

    /// Create the synthetic system turn that holds a conversation summary
    pub fn summary(summary_text: impl Into<String>) -> Result<Self> {
        let mut turn = Self::new(Role::System, summary_text)?;
        turn.is_summary = true;
        Ok(turn)
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_summary(&self) -> bool {
        self.is_summary
    }
}

/// Ordered sequence of turns, insertion order = chronological order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Start a conversation seeded with one assistant greeting
    pub fn with_greeting(greeting: impl Into<String>) -> Result<Self> {
        let mut log = Self::new();
        log.push(Turn::assistant(greeting)?);
        Ok(log)
    }

    /// Replace-wholesale constructor used by memory policies
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    /// Append a turn. Logs never reorder.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The last `count` turns (all of them when the log is shorter)
    pub fn tail(&self, count: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(count);
        &self.turns[start..]
    }

    /// The leading summary turn, if the log carries one
    pub fn summary(&self) -> Option<&Turn> {
        self.turns.first().filter(|t| t.is_summary())
    }

    /// Serialized role/content pairs, one per line
    pub fn transcript(&self) -> String {
        format_transcript(&self.turns)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Render turns as `role: content` lines
pub fn format_transcript(turns: &[Turn]) -> String {
    let mut text = String::new();

    for turn in turns {
        text.push_str(&format!("{}: {}\n", turn.role(), turn.content()));
    }

    text
}
