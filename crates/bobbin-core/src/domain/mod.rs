//! Domain model: ids, task definitions, instances, status, lifecycle events.

pub mod events;
pub mod ids;
pub mod instance;
pub mod state;
pub mod task;

pub use events::LifecycleEvent;
pub use ids::{InstanceId, TaskId};
pub use instance::TaskInstance;
pub use state::TaskStatus;
pub use task::{TaskDefinition, TaskType};
