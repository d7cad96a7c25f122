use std::cmp::Reverse;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use taskgrid::task::FileBindings;
use taskgrid::{
    CapacityProvider, Completion, HostId, ResourceVector, ServiceEvent, Set, Task, TaskId,
    TaskService, WorkerCapacity,
};

/// Return code reported when the task could not be started on its worker
/// (e.g. an input could not be staged).
pub const START_FAILURE_CODE: i32 = -1;

/// Workers running on the local machine, each bounded by its capacity.
pub struct LocalPool {
    workers: Vec<LocalWorker>,
    excluded: Set<HostId>,
    queue: VecDeque<QueuedTask>,
    returned: VecDeque<(TaskId, String)>,
    running: usize,
    work_dir: PathBuf,
    sender: UnboundedSender<Finished>,
    receiver: UnboundedReceiver<Finished>,
    // Per-worker input caches live here and are removed with the pool
    _cache_root: TempDir,
}

struct LocalWorker {
    capacity: WorkerCapacity,
    used: ResourceVector,
    cache_dir: PathBuf,
}

impl LocalWorker {
    fn free(&self) -> ResourceVector {
        self.capacity.resources.saturating_sub(&self.used)
    }
}

#[derive(Clone)]
struct QueuedTask {
    task_id: TaskId,
    /// Index of the worker the allocation was sized for.
    worker: Option<usize>,
    command: String,
    inputs: FileBindings,
    outputs: FileBindings,
    allocation: ResourceVector,
}

struct Finished {
    worker: usize,
    completion: Completion,
}

impl LocalPool {
    pub fn start(workers: Vec<WorkerCapacity>, work_dir: &Path) -> crate::Result<Self> {
        if workers.is_empty() {
            return crate::common::error::error("No worker is defined".to_string());
        }
        std::fs::create_dir_all(work_dir).map_err(|e| {
            crate::Error::GenericError(format!(
                "Cannot create work directory {}: {e}",
                work_dir.display()
            ))
        })?;
        let cache_root = tempfile::Builder::new()
            .prefix("cache-")
            .tempdir_in(work_dir)?;

        let mut local_workers = Vec::with_capacity(workers.len());
        for (index, capacity) in workers.into_iter().enumerate() {
            let cache_dir = cache_root.path().join(format!("worker-{index}"));
            std::fs::create_dir(&cache_dir)?;
            log::info!(
                "Worker {} registered with {}",
                capacity.host,
                capacity.resources
            );
            local_workers.push(LocalWorker {
                capacity,
                used: ResourceVector::ZERO,
                cache_dir,
            });
        }

        let (sender, receiver) = unbounded_channel();
        Ok(LocalPool {
            workers: local_workers,
            excluded: Default::default(),
            queue: Default::default(),
            returned: Default::default(),
            running: 0,
            work_dir: work_dir.to_path_buf(),
            sender,
            receiver,
            _cache_root: cache_root,
        })
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostId> {
        self.workers.iter().map(|w| &w.capacity.host)
    }

    fn is_eligible(&self, worker: &LocalWorker) -> bool {
        !self.excluded.contains(&worker.capacity.host)
    }

    fn worker_index(&self, host: &HostId) -> Option<usize> {
        self.workers.iter().position(|w| &w.capacity.host == host)
    }

    /// The task can run once its worker (or, when it is not bound to one,
    /// some eligible worker) is idle.
    fn can_ever_hold(&self, task: &QueuedTask) -> bool {
        let holds = |w: &LocalWorker| {
            self.is_eligible(w) && task.allocation.fits(&w.capacity.resources)
        };
        match task.worker {
            Some(index) => holds(&self.workers[index]),
            None => self.workers.iter().any(holds),
        }
    }

    fn find_free_worker(&self, task: &QueuedTask) -> Option<usize> {
        let free = |w: &LocalWorker| self.is_eligible(w) && task.allocation.fits(&w.free());
        match task.worker {
            Some(index) => free(&self.workers[index]).then_some(index),
            None => self.workers.iter().position(free),
        }
    }

    fn backlog(&self, index: usize) -> usize {
        self.queue
            .iter()
            .filter(|task| task.worker == Some(index))
            .count()
    }

    fn schedule(&mut self) {
        let mut waiting = VecDeque::new();
        while let Some(task) = self.queue.pop_front() {
            match self.find_free_worker(&task) {
                Some(index) => self.launch(index, task),
                None => waiting.push_back(task),
            }
        }
        self.queue = waiting;
    }

    fn launch(&mut self, index: usize, task: QueuedTask) {
        let worker = &mut self.workers[index];
        worker.used += task.allocation;
        self.running += 1;

        let host = worker.capacity.host.clone();
        let cache_dir = worker.cache_dir.clone();
        let work_dir = self.work_dir.clone();
        let sender = self.sender.clone();
        log::debug!("Starting task {} on {host}", task.task_id);

        tokio::spawn(async move {
            let (return_code, output) =
                match run_task(&task, &host, &work_dir, &cache_dir).await {
                    Ok(result) => result,
                    Err(e) => (
                        START_FAILURE_CODE,
                        format!("Task could not be started on {host}: {e}"),
                    ),
                };
            let completion = Completion {
                task_id: task.task_id,
                return_code,
                host,
                output,
                resources_allocated: task.allocation,
                resources_measured: None,
            };
            // The receiver only disappears together with the pool
            let _ = sender.send(Finished {
                worker: index,
                completion,
            });
        });
    }

    fn release(&mut self, finished: &Finished) {
        let worker = &mut self.workers[finished.worker];
        worker.used = worker
            .used
            .saturating_sub(&finished.completion.resources_allocated);
        self.running -= 1;
    }
}

impl CapacityProvider for LocalPool {
    /// The eligible worker with the fewest tasks waiting for it, preferring
    /// the one with the most free resources. A task sized for this worker
    /// is run only there.
    fn candidate_capacity(&self) -> taskgrid::Result<WorkerCapacity> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, w)| self.is_eligible(w))
            .min_by_key(|(index, w)| (self.backlog(*index), Reverse(w.free().size_key())))
            .map(|(_, w)| w.capacity.clone())
            .ok_or_else(|| {
                taskgrid::Error::WorkerUnavailable("every worker is excluded".to_string())
            })
    }
}

impl TaskService for LocalPool {
    async fn submit(&mut self, task: &Task) -> taskgrid::Result<()> {
        let allocation = task.allocation.ok_or_else(|| {
            taskgrid::Error::GenericError(format!("Task {} has no allocation", task.id))
        })?;
        let worker = match &task.worker {
            Some(host) => Some(self.worker_index(host).ok_or_else(|| {
                taskgrid::Error::WorkerUnavailable(format!("unknown worker {host}"))
            })?),
            None => None,
        };
        let queued = QueuedTask {
            task_id: task.id,
            worker,
            command: task.command.clone(),
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
            allocation,
        };
        if !self.can_ever_hold(&queued) {
            return Err(taskgrid::Error::WorkerUnavailable(format!(
                "no eligible worker can hold [{allocation}]"
            )));
        }
        self.queue.push_back(queued);
        self.schedule();
        Ok(())
    }

    async fn wait_next(&mut self, timeout: Duration) -> taskgrid::Result<Option<ServiceEvent>> {
        if let Some((task_id, reason)) = self.returned.pop_front() {
            return Ok(Some(ServiceEvent::Returned { task_id, reason }));
        }
        // Capacity freed by the previous completion is refilled only now,
        // after the caller had the chance to exclude its host
        self.schedule();
        if self.running == 0 {
            return Ok(None);
        }
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(finished)) => {
                self.release(&finished);
                Ok(Some(ServiceEvent::Completed(finished.completion)))
            }
            Ok(None) => Err(taskgrid::Error::GenericError(
                "Worker channel was closed".to_string(),
            )),
            Err(_) => Ok(None),
        }
    }

    fn has_outstanding(&self) -> bool {
        self.running > 0 || !self.queue.is_empty() || !self.returned.is_empty()
    }

    fn exclude_host(&mut self, host: &HostId) {
        if !self.excluded.insert(host.clone()) {
            return;
        }
        log::debug!("Host {host} excluded from scheduling");
        let queue = std::mem::take(&mut self.queue);
        for task in queue {
            if self.can_ever_hold(&task) {
                self.queue.push_back(task);
            } else {
                self.returned.push_back((
                    task.task_id,
                    format!("no eligible worker can hold [{}]", task.allocation),
                ));
            }
        }
        self.schedule();
    }
}

async fn run_task(
    task: &QueuedTask,
    host: &HostId,
    work_dir: &Path,
    cache_dir: &Path,
) -> crate::Result<(i32, String)> {
    let sandbox = tempfile::Builder::new()
        .prefix(&format!("task-{}-", task.task_id))
        .tempdir_in(work_dir)?;

    let inputs = task.inputs.clone();
    let sandbox_path = sandbox.path().to_path_buf();
    let cache_path = cache_dir.to_path_buf();
    tokio::task::spawn_blocking(move || stage_inputs(&inputs, &sandbox_path, &cache_path))
        .await
        .map_err(|e| crate::Error::GenericError(e.to_string()))??;

    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&task.command)
        .current_dir(sandbox.path())
        .env("GRIDSWEEP_HOST", host.as_str())
        .env("GRIDSWEEP_TASK_ID", task.task_id.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let return_code = output.status.code().unwrap_or(START_FAILURE_CODE);

    let outputs = task.outputs.clone();
    let sandbox_path = sandbox.path().to_path_buf();
    let missing = tokio::task::spawn_blocking(move || collect_outputs(&outputs, &sandbox_path))
        .await
        .map_err(|e| crate::Error::GenericError(e.to_string()))??;
    for target in missing {
        log::warn!(
            "Task {} did not produce output {}",
            task.task_id,
            target.display()
        );
        text.push_str(&format!("\nmissing output: {}", target.display()));
    }
    Ok((return_code, text))
}

fn stage_inputs(inputs: &FileBindings, sandbox: &Path, cache_dir: &Path) -> crate::Result<()> {
    for input in inputs {
        let dest = sandbox.join(&input.target);
        if input.cache {
            let cached = cache_dir.join(&input.target);
            if !cached.exists() {
                fill_cache(&input.source, &cached)?;
            }
            if cached.is_dir() || std::fs::hard_link(&cached, &dest).is_err() {
                copy_path(&cached, &dest)?;
            }
        } else {
            copy_path(&input.source, &dest)?;
        }
    }
    Ok(())
}

/// Copies into a temporary name first so that concurrent tasks on one worker
/// never observe a half-written cache entry.
fn fill_cache(source: &Path, cached: &Path) -> crate::Result<()> {
    let parent = cached.parent().unwrap_or(cached);
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new().prefix(".stage-").tempdir_in(parent)?;
    let staged = staging.path().join("entry");
    copy_path(source, &staged)?;
    if let Err(e) = std::fs::rename(&staged, cached) {
        if !cached.exists() {
            return Err(e.into());
        }
    }
    Ok(())
}

/// Returns the targets that were not found in the sandbox.
fn collect_outputs(outputs: &FileBindings, sandbox: &Path) -> crate::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    for output in outputs {
        let produced = sandbox.join(&output.target);
        if produced.exists() {
            copy_path(&produced, &output.source)?;
        } else {
            missing.push(output.target.clone());
        }
    }
    Ok(missing)
}

fn copy_path(source: &Path, dest: &Path) -> crate::Result<()> {
    if source.is_dir() {
        std::fs::create_dir_all(dest)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            copy_path(&entry.path(), &dest.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, dest).map_err(|e| {
            crate::Error::GenericError(format!(
                "Cannot copy {} to {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;
    }
    Ok(())
}
