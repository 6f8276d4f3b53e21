//! Process-wide set of instances currently held by a worker.
//!
//! This only guards against two workers of the same process running one
//! instance. Across processes, exclusivity comes from `pop_max` alone.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::InstanceId;

#[derive(Debug, Clone, Default)]
pub struct ProcessingSet {
    inner: Arc<Mutex<HashSet<InstanceId>>>,
}

impl ProcessingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for the caller. `None` if another worker already holds it.
    /// The claim is released when the guard drops, on every exit path.
    pub fn try_claim(&self, id: InstanceId) -> Option<ProcessingGuard> {
        if self.inner.lock().insert(id) {
            Some(ProcessingGuard {
                id,
                inner: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.inner.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// 処理中の間だけ保持するガード。drop で claim を解放
#[derive(Debug)]
pub struct ProcessingGuard {
    id: InstanceId,
    inner: Arc<Mutex<HashSet<InstanceId>>>,
}

impl ProcessingGuard {
    pub fn id(&self) -> InstanceId {
        self.id
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.id);
    }
}
