use std::collections::VecDeque;
use std::time::Duration;

use crate::common::Set;
use crate::service::{CapacityProvider, Completion, ServiceEvent, TaskService, WorkerCapacity};
use crate::{HostId, ResourceVector, Task, TaskId};

/// Scripted result of the next finished task.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub host: HostId,
    pub return_code: i32,
    pub measured: Option<ResourceVector>,
}

impl ScriptedRun {
    pub fn on(host: &str, return_code: i32) -> Self {
        ScriptedRun {
            host: HostId::new(host),
            return_code,
            measured: None,
        }
    }

    pub fn measured(mut self, usage: ResourceVector) -> Self {
        self.measured = Some(usage);
        self
    }
}

/// Execution service that finishes tasks in submission order with
/// outcomes taken from a script.
#[derive(Default)]
pub struct TestService {
    workers: Vec<WorkerCapacity>,
    excluded: Set<HostId>,
    script: VecDeque<ScriptedRun>,
    outstanding: VecDeque<(TaskId, ResourceVector)>,
    idle_polls: u32,
    returns: u32,
    rejections: u32,
    pub submitted: Vec<Task>,
    pub exclusions: Vec<HostId>,
    pub polls: u32,
}

impl TestService {
    pub fn new(workers: &[(&str, ResourceVector)]) -> Self {
        TestService {
            workers: workers
                .iter()
                .map(|(host, resources)| WorkerCapacity {
                    host: HostId::new(*host),
                    resources: *resources,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn script<I: IntoIterator<Item = ScriptedRun>>(mut self, runs: I) -> Self {
        self.script.extend(runs);
        self
    }

    /// Number of `wait_next` calls that report nothing before each completion.
    pub fn idle_polls(mut self, count: u32) -> Self {
        self.idle_polls = count;
        self
    }

    /// The first `count` tasks that reach the front of the queue are handed
    /// back instead of being run.
    pub fn return_first(mut self, count: u32) -> Self {
        self.returns = count;
        self
    }

    /// The first `count` calls of `submit` fail as if no worker were free.
    pub fn reject_first(mut self, count: u32) -> Self {
        self.rejections = count;
        self
    }

    pub fn submitted_commands(&self) -> Vec<&str> {
        self.submitted.iter().map(|t| t.command.as_str()).collect()
    }
}

impl CapacityProvider for TestService {
    fn candidate_capacity(&self) -> crate::Result<WorkerCapacity> {
        self.workers
            .iter()
            .find(|w| !self.excluded.contains(&w.host))
            .cloned()
            .ok_or_else(|| crate::Error::WorkerUnavailable("all workers excluded".to_string()))
    }
}

impl TaskService for TestService {
    async fn submit(&mut self, task: &Task) -> crate::Result<()> {
        let allocation = task.allocation.expect("allocation is not bound");
        if self.rejections > 0 {
            self.rejections -= 1;
            return Err(crate::Error::WorkerUnavailable("test service is full".to_string()));
        }
        self.outstanding.push_back((task.id, allocation));
        self.submitted.push(task.clone());
        Ok(())
    }

    async fn wait_next(&mut self, _timeout: Duration) -> crate::Result<Option<ServiceEvent>> {
        self.polls += 1;
        if self.idle_polls > 0 && self.polls % (self.idle_polls + 1) != 0 {
            return Ok(None);
        }
        let Some((task_id, allocation)) = self.outstanding.pop_front() else {
            return Ok(None);
        };
        if self.returns > 0 {
            self.returns -= 1;
            return Ok(Some(ServiceEvent::Returned {
                task_id,
                reason: "handed back by test service".to_string(),
            }));
        }
        let run = self
            .script
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::on("default-host", 0));
        Ok(Some(ServiceEvent::Completed(Completion {
            task_id,
            return_code: run.return_code,
            host: run.host,
            output: format!("output of task {task_id}"),
            resources_allocated: allocation,
            resources_measured: run.measured,
        })))
    }

    fn has_outstanding(&self) -> bool {
        !self.outstanding.is_empty()
    }

    fn exclude_host(&mut self, host: &HostId) {
        self.excluded.insert(host.clone());
        self.exclusions.push(host.clone());
    }
}
