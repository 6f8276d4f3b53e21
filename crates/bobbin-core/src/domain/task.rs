use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskId;

/// Routing key: selects the handler and the queue partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reusable template/policy for a unit of work.
///
/// `retry_count` is the only field mutated after enqueue; workers bump it on
/// each failed attempt and it never exceeds `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,

    /// Higher runs first.
    pub priority: i64,

    pub max_retries: u32,

    #[serde(default)]
    pub retry_count: u32,
}

impl TaskDefinition {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// New definition with a generated `task_id`, priority 0 and the default
    /// retry budget.
    pub fn new(task_type: impl Into<TaskType>, payload: serde_json::Value) -> Self {
        Self {
            task_id: TaskId::generate(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_count: 0,
        }
    }

    /// Use a caller-supplied id instead of the generated one.
    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Record one failed attempt. Returns `true` while the retry budget still
    /// allows another attempt.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.has_retries_left()
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
