//! PriorityQueueStore port - 優先度付きキュー + レコード保存
//!
//! The store holds two kinds of data:
//! - ordered sets ("partitions") of instance ids scored by priority, one per
//!   task type;
//! - opaque byte records for definitions and instances.
//!
//! # Contract
//! - `pop_max` is a single indivisible read-and-remove of the highest-scored
//!   member. Cross-process exclusivity of task execution depends entirely on
//!   this; a peek-then-remove implementation is not acceptable.
//! - `push` of an existing member updates its score (sorted-set semantics).
//! - Equal scores may pop in any order.
//! - `remove` is idempotent and reports whether a member was removed.

use async_trait::async_trait;

/// partition 内のソートキー。大きいほど先に pop される
pub type Score = i64;

/// Member returned by `pop_max`, together with the score it was stored at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredValue {
    pub value: String,
    pub score: Score,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error.
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PriorityQueueStore: Send + Sync {
    /// 疎通確認
    async fn ping(&self) -> Result<(), StoreError>;

    /// `value` を `score` で追加（既にあればスコアを更新）
    async fn push(&self, partition: &str, score: Score, value: &str) -> Result<(), StoreError>;

    /// 最大スコアの member を原子的に取り出す
    async fn pop_max(&self, partition: &str) -> Result<Option<ScoredValue>, StoreError>;

    /// Remove `value` if present. Returns `true` if it was removed.
    async fn remove(&self, partition: &str, value: &str) -> Result<bool, StoreError>;

    /// partition 内の member 数
    async fn len(&self, partition: &str) -> Result<usize, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// ストアのキー命名規則（全 backend 共通）
pub mod keys {
    use crate::domain::{InstanceId, TaskId, TaskType};

    pub fn definition(task_id: &TaskId) -> String {
        format!("task:def:{}", task_id.key())
    }

    pub fn instance(instance_id: &InstanceId) -> String {
        format!("task:instance:{}", instance_id.key())
    }

    pub fn queue(task_type: &TaskType) -> String {
        format!("task:queue:{}", task_type.as_str())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn keys_follow_naming_convention() {
            let task_id = TaskId::generate();
            let instance_id = InstanceId::generate();

            assert_eq!(definition(&task_id), format!("task:def:{}", task_id.key()));
            assert_eq!(
                instance(&instance_id),
                format!("task:instance:{}", instance_id.key())
            );
            assert_eq!(queue(&TaskType::new("mail")), "task:queue:mail");
        }
    }
}
