//! TaskInstance: one execution record of a TaskDefinition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InstanceId, TaskDefinition, TaskId, TaskStatus, TaskType};

/// Mutable record of one enqueue of a `TaskDefinition`.
///
/// Only the worker holding the instance in the processing set mutates it,
/// except for cancellation which only touches `Pending` instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub instance_id: InstanceId,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,

    /// Worker that last moved this instance to `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskInstance {
    pub fn new(instance_id: InstanceId, definition: &TaskDefinition, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            task_id: definition.task_id,
            task_type: definition.task_type.clone(),
            status: TaskStatus::Pending,
            agent_id: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn mark_running(&mut self, agent_id: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.agent_id = Some(agent_id.to_string());
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
    }
}
