//! Notifier port - ライフサイクルイベントの通知
//!
//! Fire-and-forget publish/subscribe. Callers never let a publish failure
//! reach the operation that triggered it.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("notifier error: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), NotifyError>;
}
