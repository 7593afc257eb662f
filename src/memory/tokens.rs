//! Token counting
//!
//! The token window policy needs a per-turn token count. Two counters ship:
//! a cheap character heuristic and exact BPE counts for OpenAI models.

use crate::error::MemoryError;
use crate::memory::store::Turn;
use crate::Result;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Maps a turn to its token count. Must be deterministic for a given
/// model and text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, turn: &Turn) -> Result<usize>;
}

/// ~4 characters per token
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, turn: &Turn) -> Result<usize> {
        Ok((turn.content().chars().count() + 3) / 4)
    }
}

/// Exact counts from the model's BPE vocabulary
pub struct BpeTokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Load the encoding for `model`. Unknown models are rejected here so a
    /// bad tokenizer setting fails at startup rather than mid-conversation.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| {
            MemoryError::Tokenizer(format!(
                "No tokenizer available for model '{}': {}",
                model, e
            ))
        })?;

        debug!(model = %model, "Loaded BPE tokenizer");

        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenCounter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, turn: &Turn) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(turn.content()).len())
    }
}

/// Sum of token counts over `turns`
pub fn count_all(counter: &dyn TokenCounter, turns: &[Turn]) -> Result<usize> {
    turns.iter().try_fold(0usize, |total, turn| {
        Ok(total + counter.count(turn)?)
    })
}
