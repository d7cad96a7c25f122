use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::resources::{PartialResources, ResourceVector};
use crate::{HostId, TaskId};

/// Category used by tasks that do not name one.
pub const DEFAULT_CATEGORY: &str = "default";

/// File moved into (input) or out of (output) the task sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBinding {
    /// Path on the submitting side.
    pub source: PathBuf,
    /// Path relative to the task sandbox.
    pub target: PathBuf,
    /// Whether a worker may keep the file around for later tasks.
    #[serde(default)]
    pub cache: bool,
}

impl FileBinding {
    pub fn new<S: Into<PathBuf>, T: Into<PathBuf>>(source: S, target: T, cache: bool) -> Self {
        FileBinding {
            source: source.into(),
            target: target.into(),
            cache,
        }
    }
}

pub type FileBindings = SmallVec<[FileBinding; 4]>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        })
    }
}

/// Result of one execution attempt, as reported by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub return_code: i32,
    pub host: HostId,
    /// Captured standard output of the command.
    pub output: String,
    pub resources_allocated: ResourceVector,
    /// Peak consumption, if the service measures it.
    pub resources_measured: Option<ResourceVector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub command: String,
    pub inputs: FileBindings,
    pub outputs: FileBindings,
    pub category: String,
    /// Per-task request; set fields override the category max envelope.
    pub requested: PartialResources,
    /// Free-form caller metadata written to the submission log.
    pub tag: Option<String>,
    pub allocation: Option<ResourceVector>,
    /// Worker whose capacity `allocation` was computed against.
    pub worker: Option<HostId>,
    pub state: TaskState,
    /// Starts at 1, incremented by every resubmission.
    pub attempt: u32,
    pub retry_of: Option<TaskId>,
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Task {
            id: TaskId::default(),
            command: command.into(),
            inputs: Default::default(),
            outputs: Default::default(),
            category: DEFAULT_CATEGORY.to_string(),
            requested: PartialResources::default(),
            tag: None,
            allocation: None,
            worker: None,
            state: TaskState::Pending,
            attempt: 1,
            retry_of: None,
            outcome: None,
        }
    }

    pub fn with_input<S: Into<PathBuf>, T: Into<PathBuf>>(
        mut self,
        source: S,
        target: T,
        cache: bool,
    ) -> Self {
        self.inputs.push(FileBinding::new(source, target, cache));
        self
    }

    pub fn with_output<S: Into<PathBuf>, T: Into<PathBuf>>(
        mut self,
        source: S,
        target: T,
        cache: bool,
    ) -> Self {
        self.outputs.push(FileBinding::new(source, target, cache));
        self
    }

    pub fn with_category<S: Into<String>>(mut self, category: S) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_cores(mut self, cores: i64) -> Self {
        self.requested.cores = Some(cores);
        self
    }

    pub fn with_memory(mut self, memory: i64) -> Self {
        self.requested.memory = Some(memory);
        self
    }

    pub fn with_disk(mut self, disk: i64) -> Self {
        self.requested.disk = Some(disk);
        self
    }

    pub fn with_gpus(mut self, gpus: i64) -> Self {
        self.requested.gpus = Some(gpus);
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Binds the allocation sized for `worker` and hands the task over.
    pub(crate) fn start(&mut self, allocation: ResourceVector, worker: HostId) {
        debug_assert_eq!(self.state, TaskState::Pending);
        self.allocation = Some(allocation);
        self.worker = Some(worker);
        self.state = TaskState::Running;
    }

    pub(crate) fn finish(&mut self, outcome: TaskOutcome) {
        debug_assert_eq!(self.state, TaskState::Running);
        self.state = if outcome.return_code == 0 {
            TaskState::Done
        } else {
            TaskState::Failed
        };
        self.outcome = Some(outcome);
    }

    /// The service gave the task back before running it.
    pub(crate) fn requeue(&mut self) {
        debug_assert_eq!(self.state, TaskState::Running);
        self.allocation = None;
        self.worker = None;
        self.state = TaskState::Pending;
    }

    /// Fresh pending copy of this task for another attempt.
    /// The new task has no identity until it is submitted.
    pub fn retry(&self) -> Task {
        Task {
            id: TaskId::default(),
            command: self.command.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            category: self.category.clone(),
            requested: self.requested,
            tag: self.tag.clone(),
            allocation: None,
            worker: None,
            state: TaskState::Pending,
            attempt: self.attempt + 1,
            retry_of: Some(self.id),
            outcome: None,
        }
    }

    pub fn return_code(&self) -> Option<i32> {
        self.outcome.as_ref().map(|o| o.return_code)
    }

    pub fn host(&self) -> Option<&HostId> {
        self.outcome.as_ref().map(|o| &o.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(return_code: i32) -> TaskOutcome {
        TaskOutcome {
            return_code,
            host: HostId::new("h"),
            output: "out".to_string(),
            resources_allocated: ResourceVector::new(1, 1, 1, 0),
            resources_measured: None,
        }
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::new("echo hello");
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.category, DEFAULT_CATEGORY);
        task.start(ResourceVector::new(1, 2, 3, 0), HostId::new("h"));
        assert_eq!(task.state, TaskState::Running);
        assert!(!task.state.is_terminal());
        task.finish(outcome(0));
        assert_eq!(task.state, TaskState::Done);
        assert_eq!(task.return_code(), Some(0));

        let mut task = Task::new("false");
        task.start(ResourceVector::ZERO, HostId::new("h"));
        task.finish(outcome(1));
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.state.is_terminal());
        assert_eq!(task.host(), Some(&HostId::new("h")));
    }

    #[test]
    fn test_retry_keeps_command_and_bindings() {
        let mut task = Task::new("bash script.sh")
            .with_input("script.sh", "script.sh", true)
            .with_output("out/r.csv", "r.csv", false)
            .with_category("sweep")
            .with_memory(4000)
            .with_tag("rate=0.05");
        task.id = TaskId::new(12);
        task.start(ResourceVector::new(1, 4000, 10, 0), HostId::new("h"));
        task.finish(outcome(1));

        let retry = task.retry();
        assert_eq!(retry.command, task.command);
        assert_eq!(retry.inputs, task.inputs);
        assert_eq!(retry.outputs, task.outputs);
        assert_eq!(retry.category, "sweep");
        assert_eq!(retry.requested, task.requested);
        assert_eq!(retry.tag.as_deref(), Some("rate=0.05"));
        assert_eq!(retry.state, TaskState::Pending);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_of, Some(TaskId::new(12)));
        assert!(retry.allocation.is_none());
        assert!(retry.worker.is_none());
        assert!(retry.outcome.is_none());
        // The failed record is untouched
        assert_eq!(task.state, TaskState::Failed);
    }
}
