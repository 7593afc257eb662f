//! Bounded Chat Memory
//!
//! Keeps an LLM conversation within a token or turn budget while preserving
//! the most recent exchange:
//! - Token window: keep the last exchange, back-fill older turns that fit
//! - Fixed turn window: fold the oldest turns into a summary turn
//! - Periodic summary: summarize the whole log, keep a short tail
//!
//! TURN CYCLE:
//! USER TURN → BOUND (policy) → PIN CONTEXT → MODEL → APPEND REPLY

pub mod api;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod memory;
pub mod session;

pub use error::{MemoryError, Result};

// Re-export common types
pub use memory::{
    select_policy, select_policy_from_config, BoundedLog, BoundedMemory, ConversationLog,
    MemoryPolicy, PolicyConfig, Role, Turn,
};
pub use session::{ConversationSession, SessionStore, TurnReport};
