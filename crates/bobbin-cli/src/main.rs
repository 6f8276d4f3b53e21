use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::info;

use std::sync::atomic::{AtomicU32, Ordering};
use bobbin_core::impls::{BroadcastNotifier, InMemoryStore};
use bobbin_core::{
    HandlerError, HandlerResult, QueueConfig, QueueError, QueueManager, TaskContext,
    TaskDefinition, TaskHandler, TaskInstance, TaskStatus, TaskType, init_tracing,
};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskHandler for HelloHandler {
    async fn handle(&self, ctx: TaskContext) -> HandlerResult {
        let p: HelloPayload = serde_json::from_value(ctx.payload().clone())
            .map_err(|e| HandlerError::new(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::new(format!("intentional failure (left={left})")));
        }

        println!("Hello, {}! (attempt {})", p.name, ctx.attempt() + 1);
        Ok(serde_json::json!({ "greeted": p.name }))
    }
}

/// `failed` は再投入待ちの場合もあるので、定義側の retry_count で判定する
async fn is_finished(manager: &QueueManager, inst: &TaskInstance) -> Result<bool, QueueError> {
    match inst.status {
        TaskStatus::Completed | TaskStatus::Cancelled => Ok(true),
        TaskStatus::Failed => Ok(manager
            .get_task_definition(inst.task_id)
            .await?
            .is_some_and(|def| !def.has_retries_left())),
        TaskStatus::Pending | TaskStatus::Running => Ok(false),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = QueueConfig::from_env()?;
    init_tracing(&config.log_filter);

    // (A) Store / Notifier を用意して接続
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut events = notifier.subscribe();
    let manager = QueueManager::builder(store)
        .notifier(notifier)
        .config(config)
        .connect()
        .await?;

    // (B) handler 登録（2 回失敗してから成功する）
    manager.register_handler("hello", Arc::new(HelloHandler::new(2)));

    // lifecycle event をそのまま表示
    let printer = tokio::spawn(async move {
        while let Ok(n) = events.recv().await {
            println!("event: {} {}", n.topic, n.payload);
        }
    });

    // (C) タスク投入。一件はすぐ取り消す
    let hello = TaskDefinition::new("hello", serde_json::json!({ "name": "bobbin" }))
        .with_priority(10)
        .with_max_retries(3);
    let id = manager.enqueue(hello).await?;
    println!("enqueued task: {id}");

    let doomed = manager
        .enqueue(TaskDefinition::new("hello", serde_json::json!({ "name": "nobody" })))
        .await?;
    println!("cancelled {doomed}: {}", manager.cancel_task(doomed).await?);

    // (D) worker を起動（2 本）
    let workers = manager.start_workers(2);
    info!(workers = ?workers.worker_ids(), "workers started");

    // (E) 完了をポーリングで待つ（completed / リトライ切れの failed）
    loop {
        let Some(inst) = manager.get_task_status(id).await? else {
            return Err(format!("task {id} disappeared").into());
        };
        if is_finished(&manager, &inst).await? {
            println!(
                "final status: status={} agent={:?} result={:?} error={:?}",
                inst.status, inst.agent_id, inst.result, inst.error
            );
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    println!(
        "queue depth: {}",
        manager.queue_depth(&TaskType::new("hello")).await?
    );

    // (F) graceful shutdown
    workers.shutdown_and_join().await;
    printer.abort();
    Ok(())
}
