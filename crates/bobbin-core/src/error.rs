use thiserror::Error;

use crate::config::ConfigError;
use crate::ports::StoreError;

/// Errors returned by the `QueueManager` façade.
///
/// Handler and notifier failures never show up here: the worker loop turns
/// the former into task state, and the latter are logged and dropped.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => QueueError::StoreUnavailable(msg),
            StoreError::Backend(msg) => QueueError::Store(msg),
        }
    }
}

/// Failure reported by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
