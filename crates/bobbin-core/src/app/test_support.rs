//! Shared helpers for queue tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::QueueManager;
use super::RetryPolicy;
use crate::config::QueueConfig;
use crate::domain::{InstanceId, TaskDefinition, TaskInstance, TaskStatus};
use crate::impls::{BroadcastNotifier, InMemoryStore, Notification};
use crate::ports::{Notifier, NotifyError, PriorityQueueStore, Score, ScoredValue, StoreError, keys};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub(crate) fn fast_config() -> QueueConfig {
    QueueConfig {
        idle_poll_interval_ms: 5,
        error_backoff_ms: 10,
        worker_name_prefix: "test-worker".to_string(),
        ..QueueConfig::default()
    }
}

pub(crate) async fn manager_on(store: Arc<InMemoryStore>) -> QueueManager {
    QueueManager::builder(store)
        .config(fast_config())
        .connect()
        .await
        .unwrap()
}

pub(crate) async fn recording_manager(
    store: Arc<InMemoryStore>,
) -> (QueueManager, broadcast::Receiver<Notification>) {
    let notifier = Arc::new(BroadcastNotifier::new(256));
    let events = notifier.subscribe();
    let manager = QueueManager::builder(store)
        .notifier(notifier)
        .config(fast_config())
        .connect()
        .await
        .unwrap();
    (manager, events)
}

/// Skip events until one with `topic` arrives.
pub(crate) async fn next_topic(
    events: &mut broadcast::Receiver<Notification>,
    topic: &str,
) -> Notification {
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let n = events.recv().await.unwrap();
            if n.topic == topic {
                return n;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {topic} event within {WAIT_LIMIT:?}"))
}

/// Topics of every event already buffered, in publish order.
pub(crate) fn drain_topics(events: &mut broadcast::Receiver<Notification>) -> Vec<String> {
    let mut topics = Vec::new();
    while let Ok(n) = events.try_recv() {
        topics.push(n.topic);
    }
    topics
}

pub(crate) async fn wait_for_status(
    manager: &QueueManager,
    id: InstanceId,
    status: TaskStatus,
) -> TaskInstance {
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            // store が落ちている間は読めないだけなので待ち続ける
            if let Ok(Some(inst)) = manager.get_task_status(id).await {
                if inst.status == status {
                    return inst;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} did not reach {status} within {WAIT_LIMIT:?}"))
}

/// Always fails, counting attempts.
#[derive(Default)]
pub(crate) struct FailingNotifier {
    attempts: AtomicUsize,
}

impl FailingNotifier {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn publish(&self, _topic: &str, _payload: serde_json::Value) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError("bus down".to_string()))
    }
}

/// `InMemoryStore` with knobs for forcing specific interleavings.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub(crate) inner: InMemoryStore,
    fail_sets: AtomicUsize,
    fail_before_remove: AtomicBool,
}

impl ScriptedStore {
    /// The next `n` calls to `set` fail with `Unavailable`.
    pub(crate) fn fail_next_sets(&self, n: usize) {
        self.fail_sets.store(n, Ordering::SeqCst);
    }

    /// The next `remove` first plays a worker that pops the instance, fails
    /// it and requeues it, as if it ran between a status read and the remove.
    pub(crate) fn fail_and_requeue_before_next_remove(&self) {
        self.fail_before_remove.store(true, Ordering::SeqCst);
    }

    async fn fail_and_requeue(&self, partition: &str, value: &str) {
        let id: InstanceId = value.parse().unwrap();
        let bytes = self.inner.get(&keys::instance(&id)).await.unwrap().unwrap();
        let mut instance: TaskInstance = serde_json::from_slice(&bytes).unwrap();
        let bytes = self
            .inner
            .get(&keys::definition(&instance.task_id))
            .await
            .unwrap()
            .unwrap();
        let mut definition: TaskDefinition = serde_json::from_slice(&bytes).unwrap();

        let popped = self.inner.pop_max(partition).await.unwrap().unwrap();
        assert_eq!(popped.value, value);

        let policy = RetryPolicy::default();
        policy.on_failure(&mut definition);
        instance.mark_failed("boom".to_string(), chrono::Utc::now());
        self.inner
            .set(
                &keys::definition(&definition.task_id),
                serde_json::to_vec(&definition).unwrap(),
            )
            .await
            .unwrap();
        self.inner
            .set(&keys::instance(&id), serde_json::to_vec(&instance).unwrap())
            .await
            .unwrap();
        let score = policy.requeue_score(definition.priority, definition.retry_count);
        self.inner.push(partition, score, value).await.unwrap();
    }
}

#[async_trait]
impl PriorityQueueStore for ScriptedStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn push(&self, partition: &str, score: Score, value: &str) -> Result<(), StoreError> {
        self.inner.push(partition, score, value).await
    }

    async fn pop_max(&self, partition: &str) -> Result<Option<ScoredValue>, StoreError> {
        self.inner.pop_max(partition).await
    }

    async fn remove(&self, partition: &str, value: &str) -> Result<bool, StoreError> {
        if self.fail_before_remove.swap(false, Ordering::SeqCst) {
            self.fail_and_requeue(partition, value).await;
        }
        self.inner.remove(partition, value).await
    }

    async fn len(&self, partition: &str) -> Result<usize, StoreError> {
        self.inner.len(partition).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let failing = self
            .fail_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("scripted set failure".to_string()));
        }
        self.inner.set(key, value).await
    }
}
