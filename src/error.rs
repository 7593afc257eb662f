//! Error types for the conversation memory manager

use thiserror::Error;

/// Result type alias for memory and chat operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {

    // =============================
    // Memory Policy Errors
    // =============================

    /// Non-positive or missing threshold parameter. Raised while building a
    /// policy, never while applying one.
    #[error("Invalid policy config: {0}")]
    InvalidPolicyConfig(String),

    /// Token counting or summarization failed. The log passed in is untouched.
    #[error("Memory update failed: {0}")]
    MemoryUpdateFailed(String),

    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    // =============================
    // Collaborator Errors
    // =============================

    /// No BPE vocabulary for the configured model, or counting failed.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Summarization error: {0}")]
    Summarization(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// A reference document could not be fetched or had no text
    #[error("Document error: {0}")]
    Document(String),

    // =============================
    // Session / Config Errors
    // =============================

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MemoryError {
    /// Whether the caller may retry the same turn later with its previous log.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::MemoryUpdateFailed(_)
                | MemoryError::LlmError(_)
                | MemoryError::HttpError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MemoryError::MemoryUpdateFailed("timeout".into()).is_retryable());
        assert!(MemoryError::LlmError("503".into()).is_retryable());
        assert!(!MemoryError::InvalidPolicyConfig("max_tokens".into()).is_retryable());
        assert!(!MemoryError::InvalidTurn("empty".into()).is_retryable());
        assert!(!MemoryError::Tokenizer("unknown model".into()).is_retryable());
        assert!(!MemoryError::Document("404".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = MemoryError::InvalidPolicyConfig("max_turns must be positive".into());
        assert_eq!(
            err.to_string(),
            "Invalid policy config: max_turns must be positive"
        );
    }
}
