use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use serde::Serialize;

use crate::allocator::{Allocator, UsageHistory};
use crate::category::{AllocationMode, CategoryRegistry, CategorySpec};
use crate::common::error::GridError;
use crate::common::{IdCounter, Map};
use crate::reputation::{HostReputation, ReputationTracker};
use crate::service::{CapacityProvider, Completion, ServiceEvent, TaskService};
use crate::task::Task;
use crate::TaskId;

/// State owned by one workflow run and shared by its dispatch loops.
#[derive(Default, Clone)]
pub struct WorkflowContext {
    pub registry: Arc<CategoryRegistry>,
    pub reputation: Arc<ReputationTracker>,
}

impl WorkflowContext {
    pub fn new(registry: Arc<CategoryRegistry>, reputation: Arc<ReputationTracker>) -> Self {
        WorkflowContext {
            registry,
            reputation,
        }
    }
}

#[derive(Debug, Clone, Default, Builder)]
#[builder(pattern = "owned")]
pub struct DispatchConfig {
    /// Maximum number of attempts of one task (first run included).
    /// `None` resubmits failed tasks without limit.
    #[builder(default, setter(strip_option))]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainOutcome {
    /// Every task reached a terminal state.
    Drained,
    /// Nothing is running, but some tasks cannot be placed because no
    /// eligible worker remains.
    Stalled,
}

#[derive(Debug)]
pub struct DrainSummary {
    pub outcome: DrainOutcome,
    pub completed: Vec<Task>,
    /// Every failed attempt, including those that were resubmitted.
    pub failed_attempts: Vec<Task>,
    /// Last attempt of tasks that ran out of their retry budget.
    pub abandoned: Vec<Task>,
    /// Tasks that were still waiting for a worker when the loop stalled.
    pub stalled: Vec<Task>,
    pub reputation: HostReputation,
}

/// Drives a batch of tasks to completion over an unreliable pool of workers.
pub struct Dispatcher<S> {
    context: WorkflowContext,
    service: S,
    config: DispatchConfig,
    allocator: Allocator,
    id_counter: IdCounter,
    running: Map<TaskId, Task>,
    deferred: VecDeque<Task>,
    completed: Vec<Task>,
    failed_attempts: Vec<Task>,
    abandoned: Vec<Task>,
    history: Map<String, UsageHistory>,
    submission_log: Option<Box<dyn Write + Send>>,
}

impl<S: TaskService + CapacityProvider> Dispatcher<S> {
    pub fn new(context: WorkflowContext, service: S, config: DispatchConfig) -> Self {
        Dispatcher {
            context,
            service,
            config,
            allocator: Allocator::default(),
            id_counter: IdCounter::starting_at(1),
            running: Default::default(),
            deferred: Default::default(),
            completed: Default::default(),
            failed_attempts: Default::default(),
            abandoned: Default::default(),
            history: Default::default(),
            submission_log: None,
        }
    }

    pub fn with_allocator(mut self, allocator: Allocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// A line `Task id :<id> - <tag>` is written for every submission.
    pub fn with_submission_log(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.submission_log = Some(sink);
        self
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    pub fn history(&self, category: &str) -> Option<&UsageHistory> {
        self.history.get(category)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Submits every task; returns the ids assigned to them in order.
    ///
    /// Tasks for which no worker is currently available are kept back and
    /// retried by [`Dispatcher::run_until_drained`].
    pub async fn submit_all<I: IntoIterator<Item = Task>>(
        &mut self,
        tasks: I,
    ) -> crate::Result<Vec<TaskId>> {
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(self.submit(task).await?);
        }
        Ok(ids)
    }

    pub async fn submit(&mut self, mut task: Task) -> crate::Result<TaskId> {
        task.id = TaskId::new(self.id_counter.next());
        let task_id = task.id;
        self.start_task(task, true).await?;
        Ok(task_id)
    }

    /// Processes completions until no task is outstanding.
    pub async fn run_until_drained(
        &mut self,
        poll_interval: Duration,
    ) -> crate::Result<DrainSummary> {
        let outcome = loop {
            self.retry_deferred().await?;
            if !self.service.has_outstanding() {
                if self.deferred.is_empty() {
                    break DrainOutcome::Drained;
                }
                log::error!(
                    "No eligible worker remains for {} waiting task(s), giving up",
                    self.deferred.len()
                );
                break DrainOutcome::Stalled;
            }
            match self.service.wait_next(poll_interval).await? {
                Some(ServiceEvent::Completed(completion)) => {
                    self.on_completion(completion).await?
                }
                Some(ServiceEvent::Returned { task_id, reason }) => {
                    self.on_returned(task_id, &reason)
                }
                None => {}
            }
        };
        Ok(DrainSummary {
            outcome,
            completed: std::mem::take(&mut self.completed),
            failed_attempts: std::mem::take(&mut self.failed_attempts),
            abandoned: std::mem::take(&mut self.abandoned),
            stalled: self.deferred.drain(..).collect(),
            reputation: self.context.reputation.snapshot(),
        })
    }

    fn effective_spec(&self, task: &Task) -> CategorySpec {
        let mut spec = self.context.registry.get_category(&task.category);
        if spec.mode == AllocationMode::Fixed {
            spec.max = spec.max.overlay(&task.requested);
        }
        spec
    }

    async fn start_task(&mut self, mut task: Task, first_try: bool) -> crate::Result<()> {
        let capacity = match self.service.candidate_capacity() {
            Ok(capacity) => capacity,
            Err(e) if e.is_retryable() => {
                self.defer(task, &e, first_try);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let spec = self.effective_spec(&task);
        let allocation = self.allocator.allocate(
            &spec,
            &capacity.resources,
            self.history.get(&task.category),
        )?;
        task.start(allocation, capacity.host);
        match self.service.submit(&task).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                task.requeue();
                self.defer(task, &e, first_try);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        log::info!(
            "Submitted task (id# {}): {} [{}]",
            task.id,
            task.command,
            allocation
        );
        self.write_submission_line(&task);
        self.running.insert(task.id, task);
        Ok(())
    }

    fn defer(&mut self, task: Task, reason: &dyn std::fmt::Display, first_try: bool) {
        if first_try {
            log::warn!("Task (id# {}) deferred: {reason}", task.id);
        } else {
            log::debug!("Task (id# {}) still deferred: {reason}", task.id);
        }
        self.deferred.push_back(task);
    }

    async fn retry_deferred(&mut self) -> crate::Result<()> {
        let deferred = std::mem::take(&mut self.deferred);
        for task in deferred {
            self.start_task(task, false).await?;
        }
        Ok(())
    }

    fn on_returned(&mut self, task_id: TaskId, reason: &str) {
        match self.running.remove(&task_id) {
            Some(mut task) => {
                task.requeue();
                self.defer(task, &reason, true);
            }
            None => log::warn!("Return of unknown task (id# {task_id}) ignored"),
        }
    }

    async fn on_completion(&mut self, completion: Completion) -> crate::Result<()> {
        let Some(mut task) = self.running.remove(&completion.task_id) else {
            log::warn!(
                "Completion of unknown task (id# {}) ignored",
                completion.task_id
            );
            return Ok(());
        };
        let outcome = completion.into_outcome();
        let host = outcome.host.clone();
        let return_code = outcome.return_code;
        log::info!(
            "Task (id# {}) complete on {}: {} (return code {})",
            task.id,
            host,
            task.command,
            return_code
        );

        if return_code == 0 {
            if let Some(measured) = &outcome.resources_measured {
                self.history
                    .entry(task.category.clone())
                    .or_default()
                    .record(measured);
            }
            task.finish(outcome);
            self.context.reputation.record_success(&host);
            self.completed.push(task);
            return Ok(());
        }

        log::warn!(
            "{}\nstdout:\n{}",
            GridError::TaskExecutionFailure {
                task_id: task.id,
                host: host.clone(),
                return_code,
            },
            outcome.output
        );
        task.finish(outcome);
        if self.context.reputation.record_failure(&host) {
            log::warn!("Blacklisting host: {host}");
        }
        self.service.exclude_host(&host);

        let retry = task.retry();
        let exhausted = self
            .config
            .max_attempts
            .is_some_and(|max| retry.attempt > max);
        if exhausted {
            log::error!(
                "Task (id# {}) failed {} time(s), not resubmitting: {}",
                task.id,
                task.attempt,
                task.command
            );
            self.abandoned.push(task.clone());
            self.failed_attempts.push(task);
            return Ok(());
        }
        self.failed_attempts.push(task);
        let command = retry.command.clone();
        let new_id = self.submit(retry).await?;
        log::info!("Resubmitted task (id# {new_id}): {command}");
        Ok(())
    }

    fn write_submission_line(&mut self, task: &Task) {
        if let Some(sink) = &mut self.submission_log {
            let description = task.tag.as_deref().unwrap_or(&task.command);
            if let Err(e) = writeln!(sink, "Task id :{} - {}", task.id, description) {
                log::warn!("Cannot write submission log: {e}");
            }
        }
    }
}
