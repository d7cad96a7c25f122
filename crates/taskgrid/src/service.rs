use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resources::ResourceVector;
use crate::task::{Task, TaskOutcome};
use crate::{HostId, TaskId};

/// Total resources of the worker an allocation is computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapacity {
    pub host: HostId,
    pub resources: ResourceVector,
}

/// Reports the capacity of the worker that the next task will be sized for.
pub trait CapacityProvider {
    /// Fails with [`crate::Error::WorkerUnavailable`] when no eligible
    /// worker is known.
    fn candidate_capacity(&self) -> crate::Result<WorkerCapacity>;
}

/// Report of a task that reached a terminal state on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub task_id: TaskId,
    pub return_code: i32,
    pub host: HostId,
    pub output: String,
    pub resources_allocated: ResourceVector,
    pub resources_measured: Option<ResourceVector>,
}

impl Completion {
    pub fn into_outcome(self) -> TaskOutcome {
        TaskOutcome {
            return_code: self.return_code,
            host: self.host,
            output: self.output,
            resources_allocated: self.resources_allocated,
            resources_measured: self.resources_measured,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Completed(Completion),
    /// The task was handed back without running, e.g. because every worker
    /// that could hold its allocation has been excluded.
    Returned { task_id: TaskId, reason: String },
}

/// Executes tasks on a pool of workers.
#[allow(async_fn_in_trait)]
pub trait TaskService {
    /// Task has its id and allocation bound when it is passed here.
    async fn submit(&mut self, task: &Task) -> crate::Result<()>;

    /// Waits up to `timeout` for any outstanding task to finish.
    async fn wait_next(&mut self, timeout: Duration) -> crate::Result<Option<ServiceEvent>>;

    /// Returns true while a submitted task has not been reported by `wait_next`.
    fn has_outstanding(&self) -> bool;

    /// No task submitted afterwards may be placed on `host`.
    fn exclude_host(&mut self, host: &HostId);
}
