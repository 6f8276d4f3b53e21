//! HandlerRegistry - task_type から handler への対応表
//!
//! Registration is last-writer-wins and may happen at any time, including
//! after workers have started; the registry sits behind a read-mostly lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{TaskDefinition, TaskInstance, TaskType};
use crate::error::HandlerError;

/// What a handler gets to work with: the instance snapshot taken when it
/// moved to `Running`, plus the definition it was enqueued from.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub instance: TaskInstance,
    pub definition: TaskDefinition,
}

impl TaskContext {
    pub fn payload(&self) -> &serde_json::Value {
        &self.definition.payload
    }

    /// これまでの失敗回数（初回は 0）
    pub fn attempt(&self) -> u32 {
        self.definition.retry_count
    }
}

pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// TaskHandler は 1 つの task_type の業務ロジック
///
/// Called concurrently from several workers for different instances of the
/// same type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> HandlerResult;
}

/// async closure を `TaskHandler` にするアダプタ
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for HandlerFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: TaskContext) -> HandlerResult {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```ignore
/// manager.register_handler("echo", handler_fn(|ctx| async move {
///     Ok(ctx.payload().clone())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}

/// HandlerRegistry は task_type -> handler の対応表
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    /// Returns the replaced handler.
    pub fn register(
        &self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.write().insert(task_type, handler)
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    /// Snapshot of registered types, sorted so rotation is stable.
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
