//! Retry policy: what happens to a failed attempt.

use crate::domain::TaskDefinition;
use crate::ports::Score;

/// 失敗した attempt に対する判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// `score` でキューに戻す
    Requeue { score: Score },

    /// リトライ上限に到達。失敗で確定
    Exhausted,
}

/// Retry policy for failed tasks.
///
/// There is no time-based delay. A retried instance goes back into its
/// partition immediately, `priority_step` lower for every failure so far, so
/// fresh work of the same priority runs before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub priority_step: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { priority_step: 1 }
    }
}

impl RetryPolicy {
    pub fn new(priority_step: i64) -> Self {
        Self { priority_step }
    }

    /// Record the failure on `definition` and decide what to do next.
    ///
    /// Mutates `definition.retry_count` (clamped to `max_retries`).
    pub fn on_failure(&self, definition: &mut TaskDefinition) -> RetryDecision {
        if definition.record_failure() {
            RetryDecision::Requeue {
                score: self.requeue_score(definition.priority, definition.retry_count),
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// Score for the `retry_count`-th retry of a task enqueued at `priority`.
    pub fn requeue_score(&self, priority: i64, retry_count: u32) -> Score {
        priority.saturating_sub(self.priority_step.saturating_mul(i64::from(retry_count)))
    }
}
