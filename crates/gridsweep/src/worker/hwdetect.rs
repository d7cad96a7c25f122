use std::path::Path;

use anyhow::anyhow;
use taskgrid::{HostId, ResourceAmount, ResourceVector, WorkerCapacity};

use crate::common::format::{format_comma_delimited, human_mb_amount};

const MB: u64 = 1024 * 1024;

/// Resources of the machine gridsweep runs on, used when the configuration
/// defines no workers. Disk is the free space of the filesystem holding `work_dir`.
pub fn detect_local_worker(work_dir: &Path) -> anyhow::Result<WorkerCapacity> {
    let cores = detect_cores()?;
    let memory = read_memory_mb()?;
    log::info!("Detected {memory} MB of memory ({})", human_mb_amount(memory));
    let disk = read_free_disk_mb(work_dir)?;
    log::info!(
        "Detected {disk} MB of free disk in {} ({})",
        work_dir.display(),
        human_mb_amount(disk)
    );
    let gpus = detect_gpus();
    Ok(WorkerCapacity {
        host: local_hostname(),
        resources: ResourceVector::new(cores, memory, disk, gpus),
    })
}

pub fn local_hostname() -> HostId {
    HostId::new(gethostname::gethostname().to_string_lossy().into_owned())
}

fn detect_cores() -> anyhow::Result<ResourceAmount> {
    let n_cpus = std::thread::available_parallelism()
        .map_err(|e| anyhow!("Cpu detection failed: {e}"))?
        .get();
    Ok(n_cpus as ResourceAmount)
}

fn detect_gpus() -> ResourceAmount {
    if let Some(devices) = detect_gpus_from_env() {
        return devices;
    }
    match read_linux_gpu_count() {
        Ok(count) if count > 0 => {
            log::info!("Detected {count} GPUs from procs");
            count as ResourceAmount
        }
        _ => 0,
    }
}

/// Tries to detect available Nvidia GPUs from the `CUDA_VISIBLE_DEVICES` environment variable.
fn detect_gpus_from_env() -> Option<ResourceAmount> {
    let devices_str = std::env::var("CUDA_VISIBLE_DEVICES").ok()?;
    let devices = parse_comma_separated_values(&devices_str)?;
    log::info!(
        "Detected GPUs {} from `CUDA_VISIBLE_DEVICES`",
        format_comma_delimited(&devices)
    );
    let mut unique = devices.clone();
    unique.sort_unstable();
    unique.dedup();
    if unique.len() != devices.len() {
        log::warn!("CUDA_VISIBLE_DEVICES contains duplicates ({devices_str})");
    }
    Some(unique.len() as ResourceAmount)
}

/// Try to find out how many Nvidia GPUs are available on the current node.
fn read_linux_gpu_count() -> anyhow::Result<usize> {
    Ok(std::fs::read_dir("/proc/driver/nvidia/gpus")?.count())
}

fn read_memory_mb() -> anyhow::Result<ResourceAmount> {
    Ok(psutil::memory::virtual_memory()?.total() / MB)
}

fn read_free_disk_mb(path: &Path) -> anyhow::Result<ResourceAmount> {
    Ok(psutil::disk::disk_usage(path)?.free() / MB)
}

/// Splits a non-empty list of comma separated items; every item has to be non-empty.
fn parse_comma_separated_values(input: &str) -> Option<Vec<String>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let items: Vec<String> = input.split(',').map(|item| item.trim().to_string()).collect();
    if items.iter().any(|item| item.is_empty()) {
        return None;
    }
    Some(items)
}
