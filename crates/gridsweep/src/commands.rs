use std::io::LineWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Local};
use colored::Colorize;
use serde::Serialize;
use taskgrid::allocator::explain;
use taskgrid::{
    AllocationMode, DispatchConfigBuilder, Dispatcher, DrainOutcome, DrainSummary, HostId,
    ReputationTracker, ResourceVector, WorkerCapacity, WorkflowContext,
};

use crate::common::cli::{AllocateOpts, HwDetectOpts, RunOpts};
use crate::common::format::{format_comma_delimited, human_duration, human_mb_amount};
use crate::common::output::{Outputs, print_json};
use crate::config::GridConfig;
use crate::sweep::build_tasks;
use crate::worker::hwdetect::detect_local_worker;
use crate::worker::pool::LocalPool;

pub const DEFAULT_WORK_DIR: &str = "gridsweep-work";

/// End-of-run report of `gridsweep run`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub outcome: DrainOutcome,
    pub whitelist: Vec<HostId>,
    pub blacklist: Vec<HostId>,
    pub completed: usize,
    pub failed_attempts: usize,
    pub abandoned: usize,
    pub stalled: usize,
    pub started_at: DateTime<Local>,
    /// Seconds
    pub duration: f64,
}

impl RunReport {
    pub fn new(summary: &DrainSummary, started_at: DateTime<Local>, elapsed: Duration) -> Self {
        RunReport {
            outcome: summary.outcome,
            whitelist: summary.reputation.whitelist().to_vec(),
            blacklist: summary.reputation.blacklist().to_vec(),
            completed: summary.completed.len(),
            failed_attempts: summary.failed_attempts.len(),
            abandoned: summary.abandoned.len(),
            stalled: summary.stalled.len(),
            started_at,
            duration: elapsed.as_secs_f64(),
        }
    }
}

pub async fn command_run(opts: RunOpts, output: Outputs) -> anyhow::Result<()> {
    let started_at = Local::now();
    let start = Instant::now();

    let config = GridConfig::load(&opts.config)?;
    let sweep = config
        .sweep
        .as_ref()
        .ok_or_else(|| anyhow!("{} has no [sweep] section", opts.config.display()))?;
    let tasks = build_tasks(sweep)?;
    let registry = config.build_registry()?;

    let work_dir = opts
        .work_dir
        .or_else(|| config.dispatch.work_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));
    let pool = resolve_workers(&config, &work_dir)
        .map_err(crate::Error::from)
        .and_then(|workers| LocalPool::start(workers, &work_dir))
        .map_err(|e| anyhow!("Instantiation of the worker pool failed: {e}"))?;
    log::info!("Worker pool ready: {}", format_comma_delimited(pool.hosts()));

    let mut dispatch_config = DispatchConfigBuilder::default();
    if let Some(max_attempts) = opts.max_attempts.or(config.dispatch.max_attempts) {
        dispatch_config = dispatch_config.max_attempts(max_attempts);
    }
    let context = WorkflowContext::new(Arc::new(registry), Arc::new(ReputationTracker::new()));
    let mut dispatcher = Dispatcher::new(context, pool, dispatch_config.build()?);
    if let Some(path) = &config.dispatch.submission_log {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Cannot create submission log {}", path.display()))?;
        dispatcher = dispatcher.with_submission_log(Box::new(LineWriter::new(file)));
    }

    log::info!("Submitting {} task(s)", tasks.len());
    dispatcher.submit_all(tasks).await?;
    log::info!("Waiting for tasks to complete...");
    let poll_interval = opts.poll_interval.unwrap_or(config.dispatch.poll_interval);
    let summary = dispatcher.run_until_drained(poll_interval).await?;

    let report = RunReport::new(&summary, started_at, start.elapsed());
    match output {
        Outputs::Cli => print_report(&report),
        Outputs::Json => print_json(&report)?,
    }
    check_outcome(&report)
}

/// Only a stalled sweep fails the process; failed tasks are part of the report.
fn check_outcome(report: &RunReport) -> anyhow::Result<()> {
    if report.abandoned > 0 {
        log::warn!("{} task(s) ran out of attempts", report.abandoned);
    }
    if report.outcome == DrainOutcome::Stalled {
        bail!(
            "{} task(s) could not be placed on any eligible worker",
            report.stalled
        );
    }
    Ok(())
}

fn resolve_workers(config: &GridConfig, work_dir: &Path) -> anyhow::Result<Vec<WorkerCapacity>> {
    if !config.workers.is_empty() {
        return Ok(config.workers.iter().map(|w| w.capacity()).collect());
    }
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("Cannot create work directory {}", work_dir.display()))?;
    log::info!("No worker configured, detecting local resources");
    Ok(vec![detect_local_worker(work_dir)?])
}

fn format_hosts(hosts: &[HostId]) -> String {
    let hosts: Vec<&str> = hosts.iter().map(|h| h.as_str()).collect();
    format!("[{}]", hosts.join(", "))
}

fn print_report(report: &RunReport) {
    match report.outcome {
        DrainOutcome::Drained => println!("{}", "All tasks complete.".green().bold()),
        DrainOutcome::Stalled => println!(
            "{}",
            "Sweep stalled, no eligible worker remains.".red().bold()
        ),
    }
    println!("Whitelist: {}", format_hosts(&report.whitelist));
    println!("Blacklist: {}", format_hosts(&report.blacklist));
    println!(
        "Completed: {}, failed attempts: {}, abandoned: {}, stalled: {}",
        report.completed, report.failed_attempts, report.abandoned, report.stalled
    );
    println!("Started at {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Total workflow takes {}.",
        human_duration(Duration::from_secs_f64(report.duration))
    );
}

#[derive(Debug, Serialize)]
struct AllocationReport {
    category: String,
    mode: AllocationMode,
    worker: ResourceVector,
    allocation: ResourceVector,
    basis: String,
}

pub fn command_allocate(opts: AllocateOpts, output: Outputs) -> anyhow::Result<()> {
    let config = GridConfig::load(&opts.config)?;
    let registry = config.build_registry()?;
    if !registry.contains(&opts.category) {
        log::warn!(
            "Category `{}` is not configured, default settings are used",
            opts.category
        );
    }

    let given = [opts.cores, opts.memory, opts.disk, opts.gpus];
    let mut capacity = if given.iter().all(Option::is_some) {
        ResourceVector::ZERO
    } else {
        detect_local_worker(Path::new("."))?.resources
    };
    if let Some(cores) = opts.cores {
        capacity.cores = cores;
    }
    if let Some(memory) = opts.memory {
        capacity.memory = memory;
    }
    if let Some(disk) = opts.disk {
        capacity.disk = disk;
    }
    if let Some(gpus) = opts.gpus {
        capacity.gpus = gpus;
    }

    let spec = registry.get_category(&opts.category);
    let explanation = explain(&spec, &capacity)?;
    if output == Outputs::Json {
        let report = AllocationReport {
            category: spec.name.clone(),
            mode: spec.mode,
            worker: capacity,
            allocation: explanation.allocation,
            basis: explanation.to_string(),
        };
        print_json(&report)?;
        return Ok(());
    }
    println!("Category:   {} ({})", spec.name.bold(), spec.mode);
    println!("Worker:     {capacity}");
    println!("Allocation: {}", explanation.allocation.to_string().bold());
    println!("Basis:      {explanation}");
    Ok(())
}

pub fn command_hwdetect(opts: HwDetectOpts, output: Outputs) -> anyhow::Result<()> {
    let work_dir = opts.work_dir.unwrap_or_else(|| PathBuf::from("."));
    let worker = detect_local_worker(&work_dir)?;
    if output == Outputs::Json {
        print_json(&worker)?;
        return Ok(());
    }
    let resources = worker.resources;
    println!("Host:   {}", worker.host);
    println!("Cores:  {}", resources.cores);
    println!("Memory: {}", human_mb_amount(resources.memory));
    println!("Disk:   {} free", human_mb_amount(resources.disk));
    println!("GPUs:   {}", resources.gpus);
    Ok(())
}
