//! WorkerLoop - タスク実行ループ
//!
//! # フロー（1 パス）
//! 1. 登録済み task_type を回転順に走査し、各 partition から `pop_max`
//! 2. ProcessingSet で claim（同一プロセス内の二重実行防止）
//! 3. instance / definition を読み込み、`running` を書いて task_started
//! 4. handler を別タスクで実行（panic も失敗として扱う）
//! 5. 成功なら `completed`、失敗なら RetryPolicy に従って再投入 or 終了
//!
//! Store errors never kill a worker: the pass is abandoned and the worker
//! backs off for `error_backoff` before trying again.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::manager::QueueCore;
use super::processing::ProcessingGuard;
use super::registry::{HandlerResult, TaskContext, TaskHandler};
use super::retry::RetryDecision;
use crate::domain::{InstanceId, LifecycleEvent, TaskDefinition, TaskInstance, TaskType};
use crate::error::{HandlerError, QueueError};
use crate::ports::{ScoredValue, keys};

/// Handle to a set of spawned workers.
/// - `request_shutdown()` で新しい取得を止める（実行中の handler は最後まで走る）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
/// - drop すると sender が消え、ワーカーも止まる
#[must_use = "dropping a WorkerGroup stops its workers"]
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    worker_ids: Vec<String>,
}

impl WorkerGroup {
    pub(crate) fn spawn(worker_ids: Vec<String>, core: Arc<QueueCore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = worker_ids
            .iter()
            .map(|worker_id| {
                let worker = WorkerLoop::new(worker_id.clone(), Arc::clone(&core), shutdown_rx.clone());
                let span = info_span!("worker", worker_id = %worker_id);
                tokio::spawn(worker.run().instrument(span))
            })
            .collect();

        Self {
            shutdown_tx,
            joins,
            worker_ids,
        }
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    pub fn len(&self) -> usize {
        self.worker_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worker_ids.is_empty()
    }

    /// Ask every worker to stop after its current item.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for every worker to exit.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

/// Result of one pass over the registered task types.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    /// At least one queue entry was consumed.
    Processed,
    /// Every partition was empty (or nothing is registered).
    Empty,
    /// The store failed; the pass was abandoned.
    TransientError(QueueError),
}

pub(crate) struct WorkerLoop {
    worker_id: String,
    core: Arc<QueueCore>,
    shutdown: watch::Receiver<bool>,
    rotation: usize,
}

impl WorkerLoop {
    pub(crate) fn new(worker_id: String, core: Arc<QueueCore>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            worker_id,
            core,
            shutdown,
            rotation: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("worker started");

        while !self.is_shutdown() {
            match self.poll_once().await {
                PollOutcome::Processed => tokio::task::yield_now().await,
                PollOutcome::Empty => {
                    let idle = self.core.config.idle_poll_interval();
                    self.sleep(idle).await;
                }
                PollOutcome::TransientError(err) => {
                    let backoff = self.core.config.error_backoff();
                    warn!(
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "queue poll failed; backing off"
                    );
                    self.sleep(backoff).await;
                }
            }
        }

        info!("worker stopped");
    }

    fn is_shutdown(&self) -> bool {
        // sender が drop された場合も停止扱い
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep for `duration`, waking early on shutdown.
    async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    /// One pass: try each registered type once, starting one further along
    /// every pass so no type is always polled first.
    pub(crate) async fn poll_once(&mut self) -> PollOutcome {
        let types = self.core.registry.task_types();
        if types.is_empty() {
            return PollOutcome::Empty;
        }

        let start = self.rotation % types.len();
        self.rotation = self.rotation.wrapping_add(1);

        let mut processed = false;
        for task_type in types.iter().cycle().skip(start).take(types.len()) {
            if self.is_shutdown() {
                break;
            }
            match self.poll_type(task_type).await {
                Ok(true) => processed = true,
                Ok(false) => {}
                Err(err) => return PollOutcome::TransientError(err),
            }
        }

        if processed {
            PollOutcome::Processed
        } else {
            PollOutcome::Empty
        }
    }

    /// Pop and process at most one entry of `task_type`. `Ok(true)` if an
    /// entry was consumed.
    async fn poll_type(&self, task_type: &TaskType) -> Result<bool, QueueError> {
        // handler は pop の前に引く。取れない type の entry には触らない
        let Some(handler) = self.core.registry.get(task_type) else {
            return Ok(false);
        };

        let partition = keys::queue(task_type);
        let Some(popped) = self.core.store.pop_max(&partition).await? else {
            return Ok(false);
        };

        let instance_id: InstanceId = match popped.value.parse() {
            Ok(id) => id,
            Err(err) => {
                warn!(%task_type, value = %popped.value, error = %err, "dropping unparseable queue entry");
                return Ok(true);
            }
        };

        let Some(guard) = self.core.processing.try_claim(instance_id) else {
            // 同一プロセスの別 worker が処理中。pop した分は元のスコアで戻す
            debug!(%instance_id, score = popped.score, "instance already in flight; putting it back");
            self.core
                .store
                .push(&partition, popped.score, &popped.value)
                .await?;
            return Ok(false);
        };

        self.process(task_type, handler, &partition, &popped, guard)
            .await?;
        Ok(true)
    }

    async fn process(
        &self,
        task_type: &TaskType,
        handler: Arc<dyn TaskHandler>,
        partition: &str,
        popped: &ScoredValue,
        guard: ProcessingGuard,
    ) -> Result<(), QueueError> {
        let instance_id = guard.id();

        let loaded = match self.load(instance_id).await {
            Ok(loaded) => loaded,
            Err(QueueError::Codec(err)) => {
                warn!(%instance_id, error = %err, "dropping instance with undecodable record");
                return Ok(());
            }
            Err(err) => {
                // 読めなかった分はキューに戻す
                self.put_back(partition, popped).await;
                return Err(err);
            }
        };
        let Some((mut instance, mut definition)) = loaded else {
            return Ok(());
        };

        instance.mark_running(&self.worker_id, self.core.clock.now());
        if let Err(err) = self.core.save_instance(&instance).await {
            // running を書けていないので handler は未実行。entry を戻して次の pass へ
            self.put_back(partition, popped).await;
            return Err(err);
        }
        info!(
            %instance_id,
            task_id = %definition.task_id,
            %task_type,
            attempt = definition.retry_count + 1,
            "task started"
        );
        self.core
            .publish(LifecycleEvent::Started {
                instance_id,
                task_id: definition.task_id,
                worker_id: self.worker_id.clone(),
            })
            .await;

        let ctx = TaskContext {
            instance: instance.clone(),
            definition: definition.clone(),
        };

        // ここから先は handler が走った後。結果は store が戻るまで書き直す
        match invoke(handler, ctx).await {
            Ok(result) => {
                instance.mark_completed(result, self.core.clock.now());
                let done = &instance;
                self.persist("completed instance", instance_id, move || {
                    self.core.save_instance(done)
                })
                .await?;
                info!(%instance_id, task_id = %definition.task_id, "task completed");
                self.core
                    .publish(LifecycleEvent::Completed {
                        instance_id,
                        task_id: definition.task_id,
                        worker_id: self.worker_id.clone(),
                    })
                    .await;
            }
            Err(err) => {
                self.handle_failure(partition, &mut instance, &mut definition, err)
                    .await?;
            }
        }

        drop(guard);
        Ok(())
    }

    /// Best-effort return of a popped entry at the score it was popped with.
    async fn put_back(&self, partition: &str, popped: &ScoredValue) {
        if let Err(err) = self
            .core
            .store
            .push(partition, popped.score, &popped.value)
            .await
        {
            error!(value = %popped.value, error = %err, "failed to put back popped entry");
        }
    }

    /// Run a store write until it succeeds, sleeping `error_backoff` between
    /// tries. Gives up only on a codec error or once shutdown is requested.
    async fn persist<F, Fut>(
        &self,
        what: &'static str,
        instance_id: InstanceId,
        mut write: F,
    ) -> Result<(), QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), QueueError>>,
    {
        let mut shutdown = self.shutdown.clone();
        let backoff = self.core.config.error_backoff();
        loop {
            let err = match write().await {
                Ok(()) => return Ok(()),
                Err(err @ QueueError::Codec(_)) => return Err(err),
                Err(err) => err,
            };
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                error!(%instance_id, what, error = %err, "giving up store write on shutdown");
                return Err(err);
            }
            warn!(
                %instance_id,
                what,
                error = %err,
                backoff_ms = backoff.as_millis() as u64,
                "store write failed; retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Read the instance and its definition. `None` means the entry should be
    /// dropped: a record is missing, or the instance is no longer runnable.
    async fn load(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<(TaskInstance, TaskDefinition)>, QueueError> {
        let Some(instance) = self.core.load_instance(&instance_id).await? else {
            warn!(%instance_id, "dropping queue entry without instance record");
            return Ok(None);
        };
        if !instance.status.is_runnable() {
            debug!(%instance_id, status = %instance.status, "skipping instance that is not runnable");
            return Ok(None);
        }
        let Some(definition) = self.core.load_definition(&instance.task_id).await? else {
            warn!(%instance_id, task_id = %instance.task_id, "dropping instance without definition record");
            return Ok(None);
        };
        Ok(Some((instance, definition)))
    }

    /// Record a failed attempt and either requeue or finish the instance.
    ///
    /// Order matters: definition (retry_count) first, then the instance, then
    /// the queue entry, so a requeued entry always sees the updated count.
    async fn handle_failure(
        &self,
        partition: &str,
        instance: &mut TaskInstance,
        definition: &mut TaskDefinition,
        err: HandlerError,
    ) -> Result<(), QueueError> {
        let instance_id = instance.instance_id;
        let decision = self.core.retry.on_failure(definition);

        let updated: &TaskDefinition = definition;
        self.persist("failed definition", instance_id, move || {
            self.core.save_definition(updated)
        })
        .await?;
        instance.mark_failed(err.message().to_string(), self.core.clock.now());
        let failed: &TaskInstance = instance;
        self.persist("failed instance", instance_id, move || {
            self.core.save_instance(failed)
        })
        .await?;

        match decision {
            RetryDecision::Requeue { score } => {
                let member = instance_id.key();
                let member = member.as_str();
                self.persist("requeue", instance_id, move || async move {
                    self.core
                        .store
                        .push(partition, score, member)
                        .await
                        .map_err(QueueError::from)
                })
                .await?;
                warn!(
                    %instance_id,
                    task_id = %definition.task_id,
                    error = %err,
                    retry_count = definition.retry_count,
                    max_retries = definition.max_retries,
                    score,
                    "task failed; requeued"
                );
            }
            RetryDecision::Exhausted => {
                error!(
                    %instance_id,
                    task_id = %definition.task_id,
                    error = %err,
                    retries = definition.retry_count,
                    "task failed permanently"
                );
                self.core
                    .publish(LifecycleEvent::Failed {
                        instance_id,
                        task_id: definition.task_id,
                        worker_id: self.worker_id.clone(),
                        error: err.message().to_string(),
                        retries: definition.retry_count,
                    })
                    .await;
            }
        }
        Ok(())
    }
}

/// Run the handler on its own task so a panic surfaces as a failure
/// instead of taking the worker down.
async fn invoke(handler: Arc<dyn TaskHandler>, ctx: TaskContext) -> HandlerResult {
    match tokio::spawn(async move { handler.handle(ctx).await }).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => Err(HandlerError::new(format!(
            "handler panicked: {}",
            panic_message(join_err.into_panic().as_ref())
        ))),
        Err(join_err) => Err(HandlerError::new(format!("handler aborted: {join_err}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
