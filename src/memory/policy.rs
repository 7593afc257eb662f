//! Memory policy configuration and selection
//!
//! Raw configuration is validated once into a closed [`MemoryPolicy`] and
//! dispatched once into a [`BoundedMemory`] object. Callers never branch on
//! the policy kind again.

use crate::error::MemoryError;
use crate::memory::context_manager::{
    apply_fixed_turn_window, apply_periodic_summary, apply_token_window, BoundedLog,
    DEFAULT_SUMMARY_DEADLINE,
};
use crate::memory::store::ConversationLog;
use crate::memory::summarizer::Summarizer;
use crate::memory::tokens::TokenCounter;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    TokenWindow,
    FixedTurnWindow,
    PeriodicSummary,
}

impl FromStr for PolicyKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "token" | "tokens" | "token_window" => Ok(PolicyKind::TokenWindow),
            "turns" | "buffer" | "fixed_turn_window" => Ok(PolicyKind::FixedTurnWindow),
            "summary" | "periodic_summary" => Ok(PolicyKind::PeriodicSummary),
            other => Err(MemoryError::InvalidPolicyConfig(format!(
                "Unknown memory policy '{}'",
                other
            ))),
        }
    }
}

/// Unvalidated policy settings as they arrive from env or JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    TokenWindow {
        max_tokens: Option<i64>,
    },
    FixedTurnWindow {
        max_turns: Option<i64>,
    },
    PeriodicSummary {
        trigger_count: Option<i64>,
        keep_tail: Option<i64>,
    },
}

/// A validated memory policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryPolicy {
    TokenWindow {
        max_tokens: NonZeroUsize,
    },
    FixedTurnWindow {
        max_turns: NonZeroUsize,
    },
    PeriodicSummary {
        trigger_count: NonZeroUsize,
        keep_tail: NonZeroUsize,
    },
}

fn positive(name: &str, value: Option<i64>) -> Result<NonZeroUsize> {
    let value = value.ok_or_else(|| {
        MemoryError::InvalidPolicyConfig(format!("{} is required", name))
    })?;

    usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            MemoryError::InvalidPolicyConfig(format!(
                "{} must be positive, got {}",
                name, value
            ))
        })
}

impl TryFrom<PolicyConfig> for MemoryPolicy {
    type Error = MemoryError;

    fn try_from(config: PolicyConfig) -> Result<Self> {
        match config {
            PolicyConfig::TokenWindow { max_tokens } => Ok(MemoryPolicy::TokenWindow {
                max_tokens: positive("max_tokens", max_tokens)?,
            }),
            PolicyConfig::FixedTurnWindow { max_turns } => Ok(MemoryPolicy::FixedTurnWindow {
                max_turns: positive("max_turns", max_turns)?,
            }),
            PolicyConfig::PeriodicSummary {
                trigger_count,
                keep_tail,
            } => Ok(MemoryPolicy::PeriodicSummary {
                trigger_count: positive("trigger_count", trigger_count)?,
                keep_tail: positive("keep_tail", keep_tail)?,
            }),
        }
    }
}

impl MemoryPolicy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            MemoryPolicy::TokenWindow { .. } => PolicyKind::TokenWindow,
            MemoryPolicy::FixedTurnWindow { .. } => PolicyKind::FixedTurnWindow,
            MemoryPolicy::PeriodicSummary { .. } => PolicyKind::PeriodicSummary,
        }
    }

    pub fn needs_summarizer(&self) -> bool {
        !matches!(self, MemoryPolicy::TokenWindow { .. })
    }
}

impl fmt::Display for MemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryPolicy::TokenWindow { max_tokens } => {
                write!(f, "token window ({} tokens)", max_tokens)
            }
            MemoryPolicy::FixedTurnWindow { max_turns } => {
                write!(f, "fixed turn window ({} turns)", max_turns)
            }
            MemoryPolicy::PeriodicSummary {
                trigger_count,
                keep_tail,
            } => write!(
                f,
                "periodic summary (every {} turns, keep {})",
                trigger_count, keep_tail
            ),
        }
    }
}

/// External services the policies call out to
#[derive(Clone)]
pub struct Collaborators {
    pub token_counter: Arc<dyn TokenCounter>,
    pub summarizer: Arc<dyn Summarizer>,
    pub summary_deadline: Duration,
}

impl Collaborators {
    pub fn new(token_counter: Arc<dyn TokenCounter>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            token_counter,
            summarizer,
            summary_deadline: DEFAULT_SUMMARY_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.summary_deadline = deadline;
        self
    }
}

/// A policy bound to its parameters and collaborators
#[async_trait]
pub trait BoundedMemory: Send + Sync {
    /// Produce the bounded log to send to the model. `log` is never modified.
    async fn bound(&self, log: &ConversationLog) -> Result<BoundedLog>;

    fn policy(&self) -> MemoryPolicy;
}

struct TokenWindowMemory {
    max_tokens: NonZeroUsize,
    counter: Arc<dyn TokenCounter>,
}

#[async_trait]
impl BoundedMemory for TokenWindowMemory {
    async fn bound(&self, log: &ConversationLog) -> Result<BoundedLog> {
        apply_token_window(log, self.max_tokens, self.counter.as_ref())
    }

    fn policy(&self) -> MemoryPolicy {
        MemoryPolicy::TokenWindow {
            max_tokens: self.max_tokens,
        }
    }
}

struct FixedTurnWindowMemory {
    max_turns: NonZeroUsize,
    summarizer: Arc<dyn Summarizer>,
    deadline: Duration,
}

#[async_trait]
impl BoundedMemory for FixedTurnWindowMemory {
    async fn bound(&self, log: &ConversationLog) -> Result<BoundedLog> {
        apply_fixed_turn_window(log, self.max_turns, self.summarizer.as_ref(), self.deadline)
            .await
    }

    fn policy(&self) -> MemoryPolicy {
        MemoryPolicy::FixedTurnWindow {
            max_turns: self.max_turns,
        }
    }
}

struct PeriodicSummaryMemory {
    trigger_count: NonZeroUsize,
    keep_tail: NonZeroUsize,
    summarizer: Arc<dyn Summarizer>,
    deadline: Duration,
}

#[async_trait]
impl BoundedMemory for PeriodicSummaryMemory {
    async fn bound(&self, log: &ConversationLog) -> Result<BoundedLog> {
        apply_periodic_summary(
            log,
            self.trigger_count,
            self.keep_tail,
            self.summarizer.as_ref(),
            self.deadline,
        )
        .await
    }

    fn policy(&self) -> MemoryPolicy {
        MemoryPolicy::PeriodicSummary {
            trigger_count: self.trigger_count,
            keep_tail: self.keep_tail,
        }
    }
}

/// Bind a validated policy to its collaborators
pub fn select_policy(policy: MemoryPolicy, collaborators: &Collaborators) -> Arc<dyn BoundedMemory> {
    info!(%policy, "Memory policy selected");

    match policy {
        MemoryPolicy::TokenWindow { max_tokens } => Arc::new(TokenWindowMemory {
            max_tokens,
            counter: collaborators.token_counter.clone(),
        }),
        MemoryPolicy::FixedTurnWindow { max_turns } => Arc::new(FixedTurnWindowMemory {
            max_turns,
            summarizer: collaborators.summarizer.clone(),
            deadline: collaborators.summary_deadline,
        }),
        MemoryPolicy::PeriodicSummary {
            trigger_count,
            keep_tail,
        } => Arc::new(PeriodicSummaryMemory {
            trigger_count,
            keep_tail,
            summarizer: collaborators.summarizer.clone(),
            deadline: collaborators.summary_deadline,
        }),
    }
}

/// Validate raw settings and bind them in one step
pub fn select_policy_from_config(
    config: PolicyConfig,
    collaborators: &Collaborators,
) -> Result<Arc<dyn BoundedMemory>> {
    let policy = MemoryPolicy::try_from(config)?;
    Ok(select_policy(policy, collaborators))
}
