//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **QueueManager**: enqueue / cancel / status / handler 登録 / worker 起動
//! - **WorkerGroup / WorkerLoop**: pop→claim→handle→complete or retry
//! - **HandlerRegistry**: task_type ごとの handler
//! - **RetryPolicy**: 失敗時の再投入スコア
//! - **ProcessingSet**: プロセス内の処理中 instance

pub mod manager;
pub mod processing;
pub mod registry;
pub mod retry;
pub mod worker_loop;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::manager::{QueueManager, QueueManagerBuilder};
pub use self::processing::{ProcessingGuard, ProcessingSet};
pub use self::registry::{
    HandlerFn, HandlerRegistry, HandlerResult, TaskContext, TaskHandler, handler_fn,
};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::worker_loop::WorkerGroup;
