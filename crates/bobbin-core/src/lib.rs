//! bobbin-core
//!
//! Priority task queue: producers enqueue typed tasks, a pool of async
//! workers pulls them from per-type priority partitions, runs the
//! registered handler, and records the outcome with bounded retries.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, instance, status, events）
//! - **ports**: 抽象化レイヤー（PriorityQueueStore, Notifier, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（QueueManager, worker loop, registry, retry）
//! - **impls**: 実装（InMemoryStore, BroadcastNotifier など開発用）
//! - **config / error / observability**: 設定・エラー型・tracing 初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{
    HandlerResult, QueueManager, QueueManagerBuilder, TaskContext, TaskHandler, WorkerGroup,
    handler_fn,
};
pub use config::{ConfigError, QueueConfig};
pub use domain::{InstanceId, LifecycleEvent, TaskDefinition, TaskId, TaskInstance, TaskStatus, TaskType};
pub use error::{HandlerError, QueueError};
pub use observability::init_tracing;
