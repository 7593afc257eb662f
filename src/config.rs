//! Environment configuration
//!
//! Settings come from the process environment (optionally seeded from a
//! `.env` file by the binaries). Memory policy values are validated here so
//! a bad threshold stops startup instead of surfacing mid-conversation.

use crate::error::MemoryError;
use crate::llm::{ChatModel, OpenAiClient, Provider};
use crate::memory::{
    ApproxTokenCounter, BpeTokenCounter, Collaborators, LlmSummarizer, MemoryPolicy,
    PolicyConfig, PolicyKind, TokenCounter,
};
use crate::Result;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_MAX_TOKENS: i64 = 5_000;
pub const DEFAULT_MAX_TURNS: i64 = 10;
pub const DEFAULT_TRIGGER_COUNT: i64 = 10;
pub const DEFAULT_KEEP_TAIL: i64 = 4;
pub const DEFAULT_SUMMARY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_GREETING: &str = "How can I help you?";
pub const DEFAULT_MAX_SESSIONS: usize = 1_000;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 3_600;

/// Which chat model to talk to
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    /// Override for the provider's API host (used by tests and proxies)
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    Approx,
    Bpe,
}

impl FromStr for TokenizerKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "approx" | "heuristic" => Ok(TokenizerKind::Approx),
            "bpe" | "tiktoken" => Ok(TokenizerKind::Bpe),
            other => Err(MemoryError::Config(format!(
                "Unknown tokenizer '{}' (expected approx or bpe)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub policy: MemoryPolicy,
    pub tokenizer: TokenizerKind,
    pub tokenizer_model: String,
    pub summary_deadline: Duration,
    pub greeting: Option<String>,
    pub port: u16,
    /// Live session cap for the API server
    pub max_sessions: usize,
    /// Sessions untouched for this long are evicted
    pub session_idle_ttl: Duration,
    /// Reference pages pinned to new terminal sessions
    pub context_urls: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("LLM_PROVIDER") {
            Some(value) => value.parse()?,
            None => Provider::OpenAi,
        };

        let (api_key, model) = match provider {
            Provider::OpenAi => (
                get("OPENAI_API_KEY").unwrap_or_default(),
                get("OPENAI_MODEL").unwrap_or_else(|| OpenAiClient::DEFAULT_MODEL.to_string()),
            ),
            Provider::Gemini => (
                get("GEMINI_API_KEY").unwrap_or_default(),
                get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            ),
        };

        let llm = LlmConfig {
            provider,
            api_key,
            model,
            base_url: get("LLM_BASE_URL"),
        };

        let kind = match get("MEMORY_POLICY") {
            Some(value) => value.parse()?,
            None => PolicyKind::TokenWindow,
        };

        let policy_config = match kind {
            PolicyKind::TokenWindow => PolicyConfig::TokenWindow {
                max_tokens: Some(parse_or(&get, "MEMORY_MAX_TOKENS", DEFAULT_MAX_TOKENS)?),
            },
            PolicyKind::FixedTurnWindow => PolicyConfig::FixedTurnWindow {
                max_turns: Some(parse_or(&get, "MEMORY_MAX_TURNS", DEFAULT_MAX_TURNS)?),
            },
            PolicyKind::PeriodicSummary => PolicyConfig::PeriodicSummary {
                trigger_count: Some(parse_or(
                    &get,
                    "MEMORY_TRIGGER_COUNT",
                    DEFAULT_TRIGGER_COUNT,
                )?),
                keep_tail: Some(parse_or(&get, "MEMORY_KEEP_TAIL", DEFAULT_KEEP_TAIL)?),
            },
        };
        let policy = MemoryPolicy::try_from(policy_config)?;

        let tokenizer = match get("TOKENIZER") {
            Some(value) => value.parse()?,
            None => TokenizerKind::Bpe,
        };

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| MemoryError::Config(format!("PORT is not a valid port: {}", value)))?,
            None => DEFAULT_PORT,
        };

        let timeout_secs: u64 =
            parse_or(&get, "SUMMARIZER_TIMEOUT_SECS", DEFAULT_SUMMARY_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(MemoryError::Config(
                "SUMMARIZER_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        let max_sessions: usize = parse_or(&get, "MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?;
        if max_sessions == 0 {
            return Err(MemoryError::Config("MAX_SESSIONS must be positive".to_string()));
        }

        let idle_secs: u64 = parse_or(&get, "SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS)?;
        if idle_secs == 0 {
            return Err(MemoryError::Config(
                "SESSION_IDLE_SECS must be positive".to_string(),
            ));
        }

        let context_urls = get("CONTEXT_URLS")
            .map(|value| {
                value
                    .split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            llm,
            policy,
            tokenizer,
            tokenizer_model: get("TOKENIZER_MODEL")
                .unwrap_or_else(|| BpeTokenCounter::DEFAULT_MODEL.to_string()),
            summary_deadline: Duration::from_secs(timeout_secs),
            greeting: match get("GREETING") {
                Some(text) if text.trim().eq_ignore_ascii_case("none") => None,
                Some(text) => Some(text),
                None => Some(DEFAULT_GREETING.to_string()),
            },
            port,
            max_sessions,
            session_idle_ttl: Duration::from_secs(idle_secs),
            context_urls,
        })
    }

    pub fn token_counter(&self) -> Result<Arc<dyn TokenCounter>> {
        let counter: Arc<dyn TokenCounter> = match self.tokenizer {
            TokenizerKind::Approx => Arc::new(ApproxTokenCounter),
            TokenizerKind::Bpe => Arc::new(BpeTokenCounter::for_model(&self.tokenizer_model)?),
        };
        Ok(counter)
    }

    /// Token counter plus an LLM summarizer over `model`
    pub fn collaborators(&self, model: Arc<dyn ChatModel>) -> Result<Collaborators> {
        Ok(
            Collaborators::new(self.token_counter()?, Arc::new(LlmSummarizer::new(model)))
                .with_deadline(self.summary_deadline),
        )
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| MemoryError::Config(format!("{} is not a valid number: {}", key, value))),
        None => Ok(default),
    }
}
