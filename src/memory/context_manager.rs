//! Context Window Management
//!
//! The three bounding operations. Each takes the current log by reference
//! and builds a fresh one, so a collaborator failure leaves the caller's log
//! exactly as it was.

use crate::error::MemoryError;
use crate::memory::store::{ConversationLog, Turn};
use crate::memory::summarizer::Summarizer;
use crate::memory::tokens::{count_all, TokenCounter};
use crate::Result;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of trailing turns the token window never drops
pub const TOKEN_WINDOW_TAIL: usize = 2;

/// Default deadline around a summarizer call
pub const DEFAULT_SUMMARY_DEADLINE: Duration = Duration::from_secs(30);

/// A bounded log plus what the policy did to produce it
#[derive(Debug, Clone, Serialize)]
pub struct BoundedLog {
    pub log: ConversationLog,
    /// Token total of `log`; only known for the token window
    pub total_tokens: Option<usize>,
    /// The always-kept tail alone is over `max_tokens`
    pub tail_exceeds_budget: bool,
    /// A fresh summary turn was produced
    pub summarized: bool,
    /// Raw turns no longer present verbatim
    pub dropped: usize,
}

impl BoundedLog {
    fn unchanged(log: &ConversationLog) -> Self {
        Self {
            log: log.clone(),
            total_tokens: None,
            tail_exceeds_budget: false,
            summarized: false,
            dropped: 0,
        }
    }
}

fn count_failed(e: MemoryError) -> MemoryError {
    warn!("Token counting failed, log left untouched: {}", e);
    MemoryError::MemoryUpdateFailed(format!("token counting failed: {}", e))
}

/// Keep the last exchange unconditionally, then back-fill older turns
/// newest-first while the running total stays within `max_tokens`. The walk
/// stops at the first turn that does not fit.
pub fn apply_token_window(
    log: &ConversationLog,
    max_tokens: NonZeroUsize,
    counter: &dyn TokenCounter,
) -> Result<BoundedLog> {
    let max_tokens = max_tokens.get();
    let turns = log.turns();
    let split = turns.len().saturating_sub(TOKEN_WINDOW_TAIL);
    let (older, tail) = turns.split_at(split);

    let tail_tokens = count_all(counter, tail).map_err(count_failed)?;
    let tail_exceeds_budget = tail_tokens > max_tokens;

    if tail_exceeds_budget {
        warn!(
            tail_tokens,
            max_tokens, "Most recent exchange alone exceeds the token budget"
        );
    }

    let mut total = tail_tokens;
    let mut keep_from = older.len();

    for (index, candidate) in older.iter().enumerate().rev() {
        let candidate_tokens = counter.count(candidate).map_err(count_failed)?;
        if total + candidate_tokens > max_tokens {
            break;
        }
        total += candidate_tokens;
        keep_from = index;
    }

    let dropped = keep_from;
    if dropped > 0 {
        info!(dropped, total_tokens = total, max_tokens, "Token window dropped older turns");
    } else {
        debug!(total_tokens = total, max_tokens, "Token window kept the full log");
    }

    Ok(BoundedLog {
        log: ConversationLog::from_turns(turns[keep_from..].to_vec()),
        total_tokens: Some(total),
        tail_exceeds_budget,
        summarized: false,
        dropped,
    })
}

/// Once the log outgrows `max_turns`, fold the oldest `max_turns` turns into
/// a summary and keep the last `max_turns` turns verbatim. The two ranges
/// overlap whenever the log is shorter than `2 * max_turns`.
pub async fn apply_fixed_turn_window(
    log: &ConversationLog,
    max_turns: NonZeroUsize,
    summarizer: &dyn Summarizer,
    deadline: Duration,
) -> Result<BoundedLog> {
    let max_turns = max_turns.get();
    let (previous_summary, body) = split_summary(log);

    if body.len() <= max_turns {
        return Ok(BoundedLog::unchanged(log));
    }

    // An earlier summary rides along so its content is not lost
    let mut input: Vec<Turn> = previous_summary.into_iter().cloned().collect();
    input.extend_from_slice(&body[..max_turns]);

    info!(
        log_len = body.len(),
        max_turns, "Fixed turn window exceeded, summarizing oldest turns"
    );

    let summary = summarize_within(summarizer, &input, deadline).await?;
    let kept = &body[body.len() - max_turns..];

    Ok(rebuilt(summary, kept, body.len()))
}

/// Once the log outgrows `trigger_count`, summarize the whole log and keep
/// only the last `keep_tail` turns next to the summary.
pub async fn apply_periodic_summary(
    log: &ConversationLog,
    trigger_count: NonZeroUsize,
    keep_tail: NonZeroUsize,
    summarizer: &dyn Summarizer,
    deadline: Duration,
) -> Result<BoundedLog> {
    let trigger_count = trigger_count.get();
    let (_, body) = split_summary(log);

    if body.len() <= trigger_count {
        return Ok(BoundedLog::unchanged(log));
    }

    info!(
        log_len = body.len(),
        trigger_count,
        keep_tail = keep_tail.get(),
        "Periodic summary triggered"
    );

    let summary = summarize_within(summarizer, log.turns(), deadline).await?;
    let start = body.len().saturating_sub(keep_tail.get());

    Ok(rebuilt(summary, &body[start..], body.len()))
}

/// Separate a leading summary turn from the turns retention rules count
fn split_summary(log: &ConversationLog) -> (Option<&Turn>, &[Turn]) {
    match log.summary() {
        Some(summary) => (Some(summary), &log.turns()[1..]),
        None => (None, log.turns()),
    }
}

async fn summarize_within(
    summarizer: &dyn Summarizer,
    turns: &[Turn],
    deadline: Duration,
) -> Result<Turn> {
    let text = match tokio::time::timeout(deadline, summarizer.summarize(turns)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!("Summarizer failed, log left untouched: {}", e);
            return Err(MemoryError::MemoryUpdateFailed(format!(
                "summarization failed: {}",
                e
            )));
        }
        Err(_) => {
            warn!(?deadline, "Summarizer missed its deadline, log left untouched");
            return Err(MemoryError::MemoryUpdateFailed(format!(
                "summarization timed out after {:?}",
                deadline
            )));
        }
    };

    Turn::summary(text).map_err(|e| {
        MemoryError::MemoryUpdateFailed(format!("summarizer returned no text: {}", e))
    })
}

fn rebuilt(summary: Turn, kept: &[Turn], body_len: usize) -> BoundedLog {
    let mut turns = Vec::with_capacity(kept.len() + 1);
    turns.push(summary);
    turns.extend_from_slice(kept);

    BoundedLog {
        log: ConversationLog::from_turns(turns),
        total_tokens: None,
        tail_exceeds_budget: false,
        summarized: true,
        dropped: body_len - kept.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::Role;
    use crate::memory::testing::{
        costed_log, numbered_log, CharTokenCounter, FailingSummarizer, FailingTokenCounter,
        RecordingSummarizer, StalledSummarizer,
    };

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn contents(log: &ConversationLog) -> Vec<String> {
        log.turns().iter().map(|t| t.content().to_string()).collect()
    }

    const DEADLINE: Duration = Duration::from_secs(5);

    // Token window

    #[test]
    fn test_token_window_walk_and_stop() {
        // oldest -> newest; the last two cost 40 together
        let log = costed_log(&[2, 3, 5, 10, 15, 20, 25, 30, 20, 20]);

        let bounded = apply_token_window(&log, nz(100), &CharTokenCounter).unwrap();

        // 40 + 30 + 25 = 95; the 20 would make 115. The 5-token turn further
        // back would fit but the walk has already stopped.
        assert_eq!(bounded.log.len(), 4);
        assert_eq!(bounded.total_tokens, Some(95));
        assert_eq!(bounded.dropped, 6);
        assert!(!bounded.tail_exceeds_budget);
        assert_eq!(bounded.log.turns(), &log.turns()[6..]);
    }

    #[test]
    fn test_token_window_keeps_tail_over_budget() {
        let log = costed_log(&[5, 5, 60, 70]);

        let bounded = apply_token_window(&log, nz(100), &CharTokenCounter).unwrap();

        assert!(bounded.tail_exceeds_budget);
        assert_eq!(bounded.total_tokens, Some(130));
        assert_eq!(bounded.log.turns(), log.tail(2));
    }

    #[test]
    fn test_token_window_tail_always_present() {
        let log = costed_log(&[10, 10, 10, 10, 10, 10]);

        for budget in [1, 5, 20, 25, 40, 1000] {
            let bounded = apply_token_window(&log, nz(budget), &CharTokenCounter).unwrap();
            assert_eq!(bounded.log.tail(2), log.tail(2), "budget {}", budget);
        }
    }

    #[test]
    fn test_token_window_respects_budget_when_tail_fits() {
        let log = costed_log(&[7, 3, 9, 1, 4, 6, 2, 8]);

        for budget in 10..60 {
            let bounded = apply_token_window(&log, nz(budget), &CharTokenCounter).unwrap();
            let total = bounded.total_tokens.unwrap();
            assert!(total <= budget, "budget {} total {}", budget, total);
            assert_eq!(
                total,
                count_all(&CharTokenCounter, bounded.log.turns()).unwrap()
            );
        }
    }

    #[test]
    fn test_token_window_preserves_order() {
        let log = numbered_log(8);

        let bounded = apply_token_window(&log, nz(30), &CharTokenCounter).unwrap();

        let kept = contents(&bounded.log);
        let original = contents(&log);
        let offset = original.len() - kept.len();
        assert_eq!(kept, original[offset..].to_vec());
    }

    #[test]
    fn test_token_window_short_logs() {
        let empty = ConversationLog::new();
        let bounded = apply_token_window(&empty, nz(10), &CharTokenCounter).unwrap();
        assert!(bounded.log.is_empty());
        assert_eq!(bounded.total_tokens, Some(0));

        let single = costed_log(&[50]);
        let bounded = apply_token_window(&single, nz(10), &CharTokenCounter).unwrap();
        assert_eq!(bounded.log, single);
        assert_eq!(bounded.total_tokens, Some(50));
        assert!(bounded.tail_exceeds_budget);
    }

    #[test]
    fn test_token_window_counter_failure() {
        let log = numbered_log(4);
        let result = apply_token_window(&log, nz(100), &FailingTokenCounter);
        assert!(matches!(result, Err(MemoryError::MemoryUpdateFailed(_))));
    }

    // Fixed turn window

    #[tokio::test]
    async fn test_fixed_window_at_threshold_is_noop() {
        let log = numbered_log(5);
        let summarizer = RecordingSummarizer::new("summary");

        let bounded = apply_fixed_turn_window(&log, nz(5), &summarizer, DEADLINE)
            .await
            .unwrap();

        assert_eq!(bounded.log, log);
        assert!(!bounded.summarized);
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fixed_window_one_over_threshold() {
        let log = numbered_log(6);
        let summarizer = RecordingSummarizer::new("They greeted each other.");

        let bounded = apply_fixed_turn_window(&log, nz(5), &summarizer, DEADLINE)
            .await
            .unwrap();

        assert!(bounded.summarized);
        assert_eq!(bounded.log.len(), 1 + 5);
        assert_eq!(bounded.log.last(), log.last());

        let summary = &bounded.log.turns()[0];
        assert!(summary.is_summary());
        assert_eq!(summary.role(), Role::System);
        assert_eq!(summary.content(), "They greeted each other.");

        let inputs = summarizer.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].as_slice(), &log.turns()[..5]);
    }

    #[tokio::test]
    async fn test_fixed_window_overlapping_ranges() {
        // 7 turns, max 6: summarized 0..6, kept 1..7
        let log = numbered_log(7);
        let summarizer = RecordingSummarizer::new("summary");

        let bounded = apply_fixed_turn_window(&log, nz(6), &summarizer, DEADLINE)
            .await
            .unwrap();

        let inputs = summarizer.inputs();
        let summarized = &inputs[0];
        let kept = &bounded.log.turns()[1..];
        let overlap = kept.iter().filter(|t| summarized.contains(t)).count();

        assert_eq!(overlap, 5);
        assert_eq!(bounded.dropped, 1);
    }

    #[tokio::test]
    async fn test_fixed_window_carries_previous_summary() {
        let mut log = ConversationLog::new();
        log.push(Turn::summary("earlier summary").unwrap());
        for turn in numbered_log(4).into_turns() {
            log.push(turn);
        }
        let summarizer = RecordingSummarizer::new("newer summary");

        // Leading summary is not counted: 4 turns against max 4 is a no-op
        let bounded = apply_fixed_turn_window(&log, nz(4), &summarizer, DEADLINE)
            .await
            .unwrap();
        assert!(!bounded.summarized);

        log.push(Turn::user("one more").unwrap());
        let bounded = apply_fixed_turn_window(&log, nz(4), &summarizer, DEADLINE)
            .await
            .unwrap();

        assert_eq!(bounded.log.len(), 5);
        assert_eq!(bounded.log.turns()[0].content(), "newer summary");
        assert_eq!(
            bounded.log.turns().iter().filter(|t| t.is_summary()).count(),
            1
        );
        assert_eq!(summarizer.inputs()[0][0].content(), "earlier summary");
    }

    #[tokio::test]
    async fn test_fixed_window_failure_leaves_log_untouched() {
        let log = numbered_log(9);
        let before = log.clone();

        let result = apply_fixed_turn_window(&log, nz(4), &FailingSummarizer, DEADLINE).await;

        assert!(matches!(result, Err(MemoryError::MemoryUpdateFailed(_))));
        assert_eq!(log, before);
    }

    // Periodic summary

    #[tokio::test]
    async fn test_periodic_summary_threshold() {
        let summarizer = RecordingSummarizer::new("summary");

        let at_trigger = numbered_log(8);
        let bounded = apply_periodic_summary(&at_trigger, nz(8), nz(3), &summarizer, DEADLINE)
            .await
            .unwrap();
        assert_eq!(bounded.log, at_trigger);
        assert_eq!(summarizer.call_count(), 0);

        let over = numbered_log(9);
        let bounded = apply_periodic_summary(&over, nz(8), nz(3), &summarizer, DEADLINE)
            .await
            .unwrap();

        assert_eq!(bounded.log.len(), 1 + 3);
        assert_eq!(bounded.log.tail(3), over.tail(3));
        assert_eq!(bounded.dropped, 6);
        assert_eq!(summarizer.inputs()[0].as_slice(), over.turns());
    }

    #[tokio::test]
    async fn test_periodic_summary_keep_tail_longer_than_log() {
        let log = numbered_log(3);
        let summarizer = RecordingSummarizer::new("summary");

        let bounded = apply_periodic_summary(&log, nz(2), nz(10), &summarizer, DEADLINE)
            .await
            .unwrap();

        assert_eq!(bounded.log.len(), 4);
        assert_eq!(&bounded.log.turns()[1..], log.turns());
    }

    #[tokio::test]
    async fn test_periodic_summary_deadline() {
        let log = numbered_log(6);
        let before = log.clone();

        let result = apply_periodic_summary(
            &log,
            nz(2),
            nz(2),
            &StalledSummarizer,
            Duration::from_millis(20),
        )
        .await;

        match result {
            Err(MemoryError::MemoryUpdateFailed(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(log, before);
    }

    #[tokio::test]
    async fn test_periodic_summary_empty_summary_rejected() {
        let log = numbered_log(6);
        let summarizer = RecordingSummarizer::new("   ");

        let result = apply_periodic_summary(&log, nz(2), nz(2), &summarizer, DEADLINE).await;
        assert!(matches!(result, Err(MemoryError::MemoryUpdateFailed(_))));
    }
}
