//! Lifecycle events published through the `Notifier` port.

use serde_json::json;

use super::{InstanceId, TaskId, TaskType};

/// Lifecycle transition of a task instance.
///
/// Each variant maps to one notifier topic; `payload()` produces the wire
/// shape subscribers see.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Enqueued {
        instance_id: InstanceId,
        task_id: TaskId,
        task_type: TaskType,
    },
    Started {
        instance_id: InstanceId,
        task_id: TaskId,
        worker_id: String,
    },
    Completed {
        instance_id: InstanceId,
        task_id: TaskId,
        worker_id: String,
    },
    /// Terminal failure only; retried attempts emit nothing.
    Failed {
        instance_id: InstanceId,
        task_id: TaskId,
        worker_id: String,
        error: String,
        retries: u32,
    },
    Cancelled {
        instance_id: InstanceId,
        task_id: TaskId,
    },
}

impl LifecycleEvent {
    pub const TOPIC_ENQUEUED: &'static str = "task_enqueued";
    pub const TOPIC_STARTED: &'static str = "task_started";
    pub const TOPIC_COMPLETED: &'static str = "task_completed";
    pub const TOPIC_FAILED: &'static str = "task_failed";
    pub const TOPIC_CANCELLED: &'static str = "task_cancelled";

    pub fn topic(&self) -> &'static str {
        match self {
            LifecycleEvent::Enqueued { .. } => Self::TOPIC_ENQUEUED,
            LifecycleEvent::Started { .. } => Self::TOPIC_STARTED,
            LifecycleEvent::Completed { .. } => Self::TOPIC_COMPLETED,
            LifecycleEvent::Failed { .. } => Self::TOPIC_FAILED,
            LifecycleEvent::Cancelled { .. } => Self::TOPIC_CANCELLED,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        match self {
            LifecycleEvent::Enqueued { instance_id, .. }
            | LifecycleEvent::Started { instance_id, .. }
            | LifecycleEvent::Completed { instance_id, .. }
            | LifecycleEvent::Failed { instance_id, .. }
            | LifecycleEvent::Cancelled { instance_id, .. } => *instance_id,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            LifecycleEvent::Enqueued {
                instance_id,
                task_id,
                task_type,
            } => json!({
                "instance_id": instance_id,
                "task_id": task_id,
                "task_type": task_type,
            }),
            LifecycleEvent::Started {
                instance_id,
                task_id,
                worker_id,
            }
            | LifecycleEvent::Completed {
                instance_id,
                task_id,
                worker_id,
            } => json!({
                "instance_id": instance_id,
                "task_id": task_id,
                "worker_id": worker_id,
            }),
            LifecycleEvent::Failed {
                instance_id,
                task_id,
                worker_id,
                error,
                retries,
            } => json!({
                "instance_id": instance_id,
                "task_id": task_id,
                "worker_id": worker_id,
                "error": error,
                "retries": retries,
            }),
            LifecycleEvent::Cancelled {
                instance_id,
                task_id,
            } => json!({
                "instance_id": instance_id,
                "task_id": task_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_payload_carries_error_and_retries() {
        let instance_id = InstanceId::generate();
        let task_id = TaskId::generate();
        let event = LifecycleEvent::Failed {
            instance_id,
            task_id,
            worker_id: "worker-3".into(),
            error: "timeout".into(),
            retries: 2,
        };

        assert_eq!(event.topic(), "task_failed");
        assert_eq!(event.instance_id(), instance_id);

        let payload = event.payload();
        assert_eq!(payload["instance_id"], instance_id.key());
        assert_eq!(payload["task_id"], task_id.key());
        assert_eq!(payload["worker_id"], "worker-3");
        assert_eq!(payload["error"], "timeout");
        assert_eq!(payload["retries"], 2);
    }

    #[test]
    fn enqueued_payload_has_exactly_three_fields() {
        let event = LifecycleEvent::Enqueued {
            instance_id: InstanceId::generate(),
            task_id: TaskId::generate(),
            task_type: TaskType::new("image.resize"),
        };

        let payload = event.payload();
        assert_eq!(event.topic(), "task_enqueued");
        assert_eq!(payload.as_object().unwrap().len(), 3);
        assert_eq!(payload["task_type"], "image.resize");
    }

    #[test]
    fn cancelled_payload_has_no_worker() {
        let event = LifecycleEvent::Cancelled {
            instance_id: InstanceId::generate(),
            task_id: TaskId::generate(),
        };

        assert_eq!(event.topic(), "task_cancelled");
        assert!(event.payload().get("worker_id").is_none());
    }
}
