//! InMemoryStore - 開発・テスト用の PriorityQueueStore
//!
//! Partitions keep members in a `BTreeSet` ordered by `(score, Reverse(seq))`,
//! so the last element is the highest score and, among equal scores, the
//! earliest insertion. A single `tokio::sync::Mutex` guards all state, which
//! makes every operation (including `pop_max`) atomic.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ports::{PriorityQueueStore, Score, ScoredValue, StoreError};

#[derive(Default)]
struct Partition {
    ordered: BTreeSet<(Score, Reverse<u64>, String)>,
    /// member -> (score, seq), to find the ordered entry on update/remove.
    members: HashMap<String, (Score, u64)>,
}

impl Partition {
    fn insert(&mut self, score: Score, seq: u64, value: &str) {
        if let Some((old_score, old_seq)) = self.members.remove(value) {
            self.ordered
                .remove(&(old_score, Reverse(old_seq), value.to_string()));
        }
        self.ordered
            .insert((score, Reverse(seq), value.to_string()));
        self.members.insert(value.to_string(), (score, seq));
    }

    fn pop_max(&mut self) -> Option<ScoredValue> {
        let (score, _, value) = self.ordered.pop_last()?;
        self.members.remove(&value);
        Some(ScoredValue { value, score })
    }

    fn remove(&mut self, value: &str) -> bool {
        match self.members.remove(value) {
            Some((score, seq)) => self
                .ordered
                .remove(&(score, Reverse(seq), value.to_string())),
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}

#[derive(Default)]
struct InMemoryStoreState {
    partitions: HashMap<String, Partition>,
    records: HashMap<String, Vec<u8>>,
    /// 同スコア時の FIFO 用の挿入カウンタ
    next_seq: u64,
}

/// InMemoryStore はプロセス内の PriorityQueueStore
///
/// Share it between managers by wrapping it in `Arc`.
pub struct InMemoryStore {
    state: Mutex<InMemoryStoreState>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryStoreState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (`false`) or coming back (`true`).
    /// While unavailable every call fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ))
        }
    }

    /// Members of a partition from highest to lowest score (for testing).
    #[cfg(test)]
    pub(crate) async fn members(&self, partition: &str) -> Vec<ScoredValue> {
        let state = self.state.lock().await;
        state
            .partitions
            .get(partition)
            .map(|p| {
                p.ordered
                    .iter()
                    .rev()
                    .map(|(score, _, value)| ScoredValue {
                        value: value.clone(),
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriorityQueueStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn push(&self, partition: &str, score: Score, value: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .partitions
            .entry(partition.to_string())
            .or_default()
            .insert(score, seq, value);
        Ok(())
    }

    async fn pop_max(&self, partition: &str) -> Result<Option<ScoredValue>, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        // 空のパーティションは作らない（状態を変えない）
        Ok(state
            .partitions
            .get_mut(partition)
            .and_then(Partition::pop_max))
    }

    async fn remove(&self, partition: &str, value: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state
            .partitions
            .get_mut(partition)
            .is_some_and(|p| p.remove(value)))
    }

    async fn len(&self, partition: &str) -> Result<usize, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.partitions.get(partition).map_or(0, Partition::len))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.records.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.records.insert(key.to_string(), value);
        Ok(())
    }
}
