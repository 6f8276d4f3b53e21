//! Task instance status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a `TaskInstance`.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed (terminal once the retry budget is spent)
/// - Failed -> Running (a requeued entry for the same instance was picked up)
/// - Pending -> Cancelled (external, only from Pending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Enqueued, not yet picked up.
    Pending,

    /// A worker is executing the handler.
    Running,

    /// Handler returned a result.
    Completed,

    /// Last attempt failed. Terminal unless a retry entry is still queued.
    Failed,

    /// Removed from the queue before any worker took it.
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Can an external caller still cancel it?
    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Can a worker pick it up? `Failed` is included because a retry entry
    /// re-enters the queue without resetting status.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
