//! Conversation Memory Manager
//!
//! Keeps a growing conversation within a token or turn budget before it is
//! sent to the model. Three interchangeable policies: token window, fixed
//! turn window with summary, and periodic summary.

pub mod context_manager;
pub mod policy;
pub mod store;
pub mod summarizer;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

pub use context_manager::{
    apply_fixed_turn_window, apply_periodic_summary, apply_token_window, BoundedLog,
};
pub use policy::{
    select_policy, select_policy_from_config, BoundedMemory, Collaborators, MemoryPolicy,
    PolicyConfig, PolicyKind,
};
pub use store::{ConversationLog, Role, Turn};
pub use summarizer::{LlmSummarizer, Summarizer};
pub use tokens::{ApproxTokenCounter, BpeTokenCounter, TokenCounter};
