//! QueueManager - キュー操作のファサード
//!
//! Owns the handler registry and the processing set, and wires the store,
//! notifier, clock and id generator together. Obtain one with
//! `QueueManager::builder(store)...connect().await` and pass clones around.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error, info, warn};

use super::processing::ProcessingSet;
use super::registry::{HandlerRegistry, TaskHandler};
use super::retry::RetryPolicy;
use super::worker_loop::WorkerGroup;
use crate::config::QueueConfig;
use crate::domain::{
    InstanceId, LifecycleEvent, TaskDefinition, TaskId, TaskInstance, TaskType,
};
use crate::error::QueueError;
use crate::impls::NoopNotifier;
use crate::ports::{
    Clock, IdGenerator, Notifier, PriorityQueueStore, SystemClock, UlidGenerator, keys,
};

/// State shared by the façade and every worker it spawns.
pub(crate) struct QueueCore {
    pub(crate) store: Arc<dyn PriorityQueueStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) processing: ProcessingSet,
    pub(crate) retry: RetryPolicy,
    pub(crate) config: QueueConfig,
    next_worker: AtomicUsize,
}

impl QueueCore {
    pub(crate) async fn load_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<TaskInstance>, QueueError> {
        match self.store.get(&keys::instance(instance_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_definition(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<TaskDefinition>, QueueError> {
        match self.store.get(&keys::definition(task_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn save_instance(&self, instance: &TaskInstance) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(instance)?;
        self.store
            .set(&keys::instance(&instance.instance_id), bytes)
            .await?;
        Ok(())
    }

    pub(crate) async fn save_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(definition)?;
        self.store
            .set(&keys::definition(&definition.task_id), bytes)
            .await?;
        Ok(())
    }

    /// Best-effort publish. Failures are logged and dropped.
    pub(crate) async fn publish(&self, event: LifecycleEvent) {
        let topic = event.topic();
        if let Err(err) = self.notifier.publish(topic, event.payload()).await {
            warn!(
                topic,
                instance_id = %event.instance_id(),
                error = %err,
                "failed to publish lifecycle event"
            );
        }
    }

    fn next_worker_id(&self) -> String {
        let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.config.worker_name_prefix, n)
    }
}

/// Builder for `QueueManager`.
pub struct QueueManagerBuilder {
    store: Arc<dyn PriorityQueueStore>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: QueueConfig,
}

impl QueueManagerBuilder {
    /// Defaults to `NoopNotifier`.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` on the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Check the store is reachable and build the manager.
    ///
    /// Unlike steady-state polling, a failure here is fatal and returned.
    pub async fn connect(self) -> Result<QueueManager, QueueError> {
        self.config.validate()?;
        if let Err(err) = self.store.ping().await {
            error!(error = %err, "priority queue store unreachable at startup");
            return Err(err.into());
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let retry = RetryPolicy::new(self.config.retry_priority_step);

        info!(
            worker_prefix = %self.config.worker_name_prefix,
            idle_poll_ms = self.config.idle_poll_interval_ms,
            error_backoff_ms = self.config.error_backoff_ms,
            "queue manager connected"
        );

        Ok(QueueManager {
            core: Arc::new(QueueCore {
                store: self.store,
                notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
                clock,
                ids,
                registry: HandlerRegistry::new(),
                processing: ProcessingSet::new(),
                retry,
                config: self.config,
                next_worker: AtomicUsize::new(0),
            }),
        })
    }
}

/// Façade over the queue: enqueue, cancel, status, handlers and workers.
///
/// Cloning is cheap; clones share registry, processing set and workers'
/// view of the store.
#[derive(Clone)]
pub struct QueueManager {
    core: Arc<QueueCore>,
}

impl QueueManager {
    pub fn builder(store: Arc<dyn PriorityQueueStore>) -> QueueManagerBuilder {
        QueueManagerBuilder {
            store,
            notifier: None,
            clock: None,
            ids: None,
            config: QueueConfig::default(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.core.config
    }

    /// Persist `definition`, create a pending instance and queue it.
    ///
    /// Store failures propagate; notifier failures do not.
    pub async fn enqueue(&self, definition: TaskDefinition) -> Result<InstanceId, QueueError> {
        let core = &self.core;
        let instance_id = core.ids.generate_instance_id();
        let instance = TaskInstance::new(instance_id, &definition, core.clock.now());

        core.save_definition(&definition).await?;
        core.save_instance(&instance).await?;
        core.store
            .push(
                &keys::queue(&definition.task_type),
                definition.priority,
                &instance_id.key(),
            )
            .await?;

        info!(
            %instance_id,
            task_id = %definition.task_id,
            task_type = %definition.task_type,
            priority = definition.priority,
            "task enqueued"
        );

        core.publish(LifecycleEvent::Enqueued {
            instance_id,
            task_id: definition.task_id,
            task_type: definition.task_type,
        })
        .await;

        Ok(instance_id)
    }

    /// Associate `handler` with `task_type`, replacing any previous handler.
    pub fn register_handler(
        &self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        let task_type = task_type.into();
        let previous = self.core.registry.register(task_type.clone(), handler);
        if previous.is_some() {
            info!(%task_type, "handler replaced");
        } else {
            debug!(%task_type, "handler registered");
        }
        previous
    }

    /// Spawn `n` more workers on the current tokio runtime.
    pub fn start_workers(&self, n: usize) -> WorkerGroup {
        if self.core.registry.is_empty() {
            warn!("starting workers with no registered handlers; nothing will be processed");
        }
        let worker_ids = (0..n).map(|_| self.core.next_worker_id()).collect();
        WorkerGroup::spawn(worker_ids, Arc::clone(&self.core))
    }

    pub async fn get_task_status(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<TaskInstance>, QueueError> {
        self.core.load_instance(&instance_id).await
    }

    /// Definition snapshot, including the current `retry_count`.
    pub async fn get_task_definition(
        &self,
        task_id: TaskId,
    ) -> Result<Option<TaskDefinition>, QueueError> {
        self.core.load_definition(&task_id).await
    }

    /// Cancel a pending instance.
    ///
    /// Returns `false` without side effects if the instance is unknown, past
    /// `Pending`, or was popped by a worker between the status check and the
    /// removal from the queue.
    pub async fn cancel_task(&self, instance_id: InstanceId) -> Result<bool, QueueError> {
        let core = &self.core;
        let Some(instance) = core.load_instance(&instance_id).await? else {
            return Ok(false);
        };
        if !instance.status.is_cancellable() {
            debug!(%instance_id, status = %instance.status, "cancel refused");
            return Ok(false);
        }

        let removed = core
            .store
            .remove(&keys::queue(&instance.task_type), &instance_id.key())
            .await?;
        if !removed {
            debug!(%instance_id, "cancel lost the race to a worker");
            return Ok(false);
        }

        // status を読んでから remove するまでに worker が pop→失敗→再投入して
        // いる場合がある。remove 後に読み直して pending のままか確かめる
        let current = match core.load_instance(&instance_id).await {
            Ok(current) => current,
            Err(err) => {
                self.restore_entry(&instance).await;
                return Err(err);
            }
        };
        let Some(mut instance) = current else {
            return Ok(false);
        };
        if !instance.status.is_cancellable() {
            debug!(%instance_id, status = %instance.status, "instance moved on before cancel");
            // 取り除いたのは再投入された entry。failed なら戻す
            if instance.status.is_runnable() {
                self.restore_entry(&instance).await;
            }
            return Ok(false);
        }

        instance.mark_cancelled(core.clock.now());
        if let Err(err) = core.save_instance(&instance).await {
            self.restore_entry(&instance).await;
            return Err(err);
        }
        info!(%instance_id, task_id = %instance.task_id, "task cancelled");

        core.publish(LifecycleEvent::Cancelled {
            instance_id,
            task_id: instance.task_id,
        })
        .await;

        Ok(true)
    }

    /// cancel が取り除いた entry を戻す（best-effort）
    ///
    /// Every entry of an instance sits at `requeue_score(priority, retry_count)`:
    /// the enqueue score while `retry_count` is 0, the retry score after.
    async fn restore_entry(&self, instance: &TaskInstance) {
        let core = &self.core;
        let instance_id = instance.instance_id;
        let definition = match core.load_definition(&instance.task_id).await {
            Ok(Some(definition)) => definition,
            Ok(None) => {
                warn!(%instance_id, "cannot restore queue entry without definition");
                return;
            }
            Err(err) => {
                error!(%instance_id, error = %err, "failed to load definition to restore queue entry");
                return;
            }
        };
        let score = core
            .retry
            .requeue_score(definition.priority, definition.retry_count);
        if let Err(err) = core
            .store
            .push(&keys::queue(&instance.task_type), score, &instance_id.key())
            .await
        {
            error!(%instance_id, score, error = %err, "failed to restore queue entry");
        }
    }

    /// Entries currently queued for `task_type`.
    pub async fn queue_depth(&self, task_type: &TaskType) -> Result<usize, QueueError> {
        Ok(self.core.store.len(&keys::queue(task_type)).await?)
    }

    /// Instances being processed by this manager's workers right now.
    pub fn in_flight(&self) -> usize {
        self.core.processing.len()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<QueueCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{
        FailingNotifier, ScriptedStore, drain_topics, fast_config, manager_on, next_topic,
        recording_manager,
    };
    use crate::domain::TaskStatus;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashSet;

    #[tokio::test]
    async fn connect_fails_fast_when_store_is_down() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);

        let result = QueueManager::builder(store).connect().await;
        assert!(matches!(result, Err(QueueError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn enqueue_persists_pending_instance_and_queues_it() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let manager = QueueManager::builder(store.clone())
            .clock(Arc::new(FixedClock::new(at)))
            .config(fast_config())
            .connect()
            .await
            .unwrap();

        let def = TaskDefinition::new("mail", json!({"to": "x"})).with_priority(4);
        let task_id = def.task_id;
        let id = manager.enqueue(def).await.unwrap();

        let inst = manager.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(inst.status, TaskStatus::Pending);
        assert_eq!(inst.task_id, task_id);
        assert_eq!(inst.created_at, at);

        let stored = manager.get_task_definition(task_id).await.unwrap().unwrap();
        assert_eq!(stored.payload, json!({"to": "x"}));

        let members = store.members("task:queue:mail").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].value, id.key());
        assert_eq!(members[0].score, 4);
    }

    #[tokio::test]
    async fn enqueue_returns_unique_ids_even_for_same_task() {
        let manager = manager_on(Arc::new(InMemoryStore::new())).await;
        let def = TaskDefinition::new("t", json!({}));

        let mut ids = HashSet::new();
        for _ in 0..100 {
            ids.insert(manager.enqueue(def.clone()).await.unwrap());
        }

        assert_eq!(ids.len(), 100);
        assert_eq!(manager.queue_depth(&TaskType::new("t")).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn enqueue_publishes_event() {
        let (manager, mut events) = recording_manager(Arc::new(InMemoryStore::new())).await;

        let def = TaskDefinition::new("img", json!({}));
        let task_id = def.task_id;
        let id = manager.enqueue(def).await.unwrap();

        let n = next_topic(&mut events, LifecycleEvent::TOPIC_ENQUEUED).await;
        assert_eq!(n.payload["instance_id"], id.key());
        assert_eq!(n.payload["task_id"], task_id.key());
        assert_eq!(n.payload["task_type"], "img");
    }

    #[tokio::test]
    async fn enqueue_propagates_store_failure() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_on(store.clone()).await;
        store.set_available(false);

        let err = manager
            .enqueue(TaskDefinition::new("t", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_enqueue() {
        let notifier = Arc::new(FailingNotifier::default());
        let manager = QueueManager::builder(Arc::new(InMemoryStore::new()))
            .notifier(notifier.clone())
            .config(fast_config())
            .connect()
            .await
            .unwrap();

        let id = manager
            .enqueue(TaskDefinition::new("t", json!({})))
            .await
            .unwrap();

        assert_eq!(notifier.attempts(), 1);
        assert!(manager.get_task_status(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn get_status_of_unknown_instance_is_none() {
        let manager = manager_on(Arc::new(InMemoryStore::new())).await;
        assert!(
            manager
                .get_task_status(InstanceId::generate())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancel_pending_removes_from_queue() {
        let (manager, mut events) = recording_manager(Arc::new(InMemoryStore::new())).await;
        let id = manager
            .enqueue(TaskDefinition::new("t", json!({})))
            .await
            .unwrap();

        assert!(manager.cancel_task(id).await.unwrap());

        let inst = manager.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(inst.status, TaskStatus::Cancelled);
        assert_eq!(manager.queue_depth(&TaskType::new("t")).await.unwrap(), 0);

        let n = next_topic(&mut events, LifecycleEvent::TOPIC_CANCELLED).await;
        assert_eq!(n.payload["instance_id"], id.key());

        // 二回目は false
        assert!(!manager.cancel_task(id).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_unknown_instance_is_false() {
        let manager = manager_on(Arc::new(InMemoryStore::new())).await;
        assert!(!manager.cancel_task(InstanceId::generate()).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_after_worker_popped_is_false() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_on(store.clone()).await;
        let id = manager
            .enqueue(TaskDefinition::new("t", json!({})))
            .await
            .unwrap();

        // worker が pop 済みだが、まだ running を書いていない状態
        store.pop_max("task:queue:t").await.unwrap().unwrap();

        assert!(!manager.cancel_task(id).await.unwrap());
        let inst = manager.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(inst.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_does_not_overwrite_instance_failed_in_between() {
        let store = Arc::new(ScriptedStore::default());
        let notifier = Arc::new(crate::impls::BroadcastNotifier::new(64));
        let mut events = notifier.subscribe();
        let manager = QueueManager::builder(store.clone())
            .notifier(notifier)
            .config(fast_config())
            .connect()
            .await
            .unwrap();

        let def = TaskDefinition::new("t", json!({})).with_priority(5);
        let task_id = def.task_id;
        let id = manager.enqueue(def).await.unwrap();

        // status 読み込み後、remove 前に worker が失敗→再投入する
        store.fail_and_requeue_before_next_remove();
        assert!(!manager.cancel_task(id).await.unwrap());

        let inst = manager.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(inst.status, TaskStatus::Failed);

        let def = manager.get_task_definition(task_id).await.unwrap().unwrap();
        assert_eq!(def.retry_count, 1);

        let members = store.inner.members("task:queue:t").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].value, id.key());
        assert_eq!(members[0].score, 4);

        assert!(
            !drain_topics(&mut events)
                .iter()
                .any(|t| t == LifecycleEvent::TOPIC_CANCELLED)
        );
    }

    #[tokio::test]
    async fn cancel_restores_entry_when_status_write_fails() {
        let store = Arc::new(ScriptedStore::default());
        let manager = QueueManager::builder(store.clone())
            .config(fast_config())
            .connect()
            .await
            .unwrap();

        let id = manager
            .enqueue(TaskDefinition::new("t", json!({})).with_priority(2))
            .await
            .unwrap();

        store.fail_next_sets(1);
        let err = manager.cancel_task(id).await.unwrap_err();
        assert!(matches!(err, QueueError::StoreUnavailable(_)));

        let inst = manager.get_task_status(id).await.unwrap().unwrap();
        assert_eq!(inst.status, TaskStatus::Pending);
        let members = store.inner.members("task:queue:t").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].score, 2);
    }

    #[tokio::test]
    async fn connect_rejects_non_decaying_retry_step() {
        let config = QueueConfig {
            retry_priority_step: 0,
            ..fast_config()
        };
        let result = QueueManager::builder(Arc::new(InMemoryStore::new()))
            .config(config)
            .connect()
            .await;
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn register_handler_is_last_writer_wins() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let manager = rt.block_on(manager_on(Arc::new(InMemoryStore::new())));

        let first = crate::app::handler_fn(|_| async { Ok(json!(1)) });
        let second = crate::app::handler_fn(|_| async { Ok(json!(2)) });

        assert!(manager.register_handler("t", first).is_none());
        assert!(manager.register_handler("t", second).is_some());
        assert_eq!(manager.core().registry.len(), 1);
    }
}
