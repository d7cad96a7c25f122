#[macro_use]
pub(crate) mod common;

pub mod allocator;
pub mod category;
pub mod dispatch;
pub mod reputation;
pub mod resources;
pub mod service;
pub mod task;

#[cfg(test)]
mod tests;

pub use crate::common::ids::{HostId, TaskId};
pub use crate::common::{IdCounter, Map, Set};

pub type Error = common::error::GridError;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::allocator::{Allocator, FirstGuessStrategy, MinWasteStrategy, UsageHistory, allocate};
pub use crate::category::{AllocationMode, CategoryRegistry, CategorySpec};
pub use crate::dispatch::{
    DispatchConfig, DispatchConfigBuilder, Dispatcher, DrainOutcome, DrainSummary,
    WorkflowContext,
};
pub use crate::reputation::{HostReputation, ReputationTracker};
pub use crate::resources::{PartialResources, ResourceAmount, ResourceKind, ResourceVector};
pub use crate::service::{
    CapacityProvider, Completion, ServiceEvent, TaskService, WorkerCapacity,
};
pub use crate::task::{FileBinding, Task, TaskOutcome, TaskState};
