//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryStore**: プロセス内の PriorityQueueStore
//! - **NoopNotifier**: 何もしない Notifier
//! - **BroadcastNotifier**: tokio broadcast によるプロセス内配信
//!
//! 本番用のストア（Redis の sorted set など）は別クレートで
//! `PriorityQueueStore` を実装する想定です。

pub mod memory_store;
pub mod notifier;

pub use self::memory_store::InMemoryStore;
pub use self::notifier::{BroadcastNotifier, NoopNotifier, Notification};
