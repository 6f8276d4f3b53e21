//! Notifier implementations: no-op and in-process broadcast.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::ports::{Notifier, NotifyError};

/// 何もしない Notifier
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, _topic: &str, _payload: serde_json::Value) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// 購読者が受け取る 1 件のイベント
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Fans events out to every subscriber over a `tokio::sync::broadcast`
/// channel. Slow subscribers lose the oldest events once `capacity` is
/// exceeded; publishing never waits.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), NotifyError> {
        // 購読者がいないのはエラーではない
        let _ = self.sender.send(Notification {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
