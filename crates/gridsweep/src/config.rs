use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use taskgrid::{
    AllocationMode, CategoryRegistry, CategorySpec, HostId, PartialResources, ResourceVector,
    Set, WorkerCapacity,
};

use crate::common::error::error;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Contents of a sweep configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GridConfig {
    #[serde(default)]
    pub dispatch: DispatchSection,
    /// When empty, a single worker with the detected local resources is used.
    #[serde(default, rename = "worker")]
    pub workers: Vec<WorkerDef>,
    #[serde(default, rename = "category")]
    pub categories: Vec<CategoryDef>,
    pub sweep: Option<SweepDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DispatchSection {
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// File receiving a `Task id :<id> - <tag>` line for every submission.
    #[serde(default)]
    pub submission_log: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for DispatchSection {
    fn default() -> Self {
        DispatchSection {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
            submission_log: None,
            work_dir: None,
        }
    }
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WorkerDef {
    pub name: String,
    pub cores: u64,
    /// MB
    pub memory: u64,
    /// MB
    pub disk: u64,
    #[serde(default)]
    pub gpus: u64,
}

impl WorkerDef {
    pub fn capacity(&self) -> WorkerCapacity {
        WorkerCapacity {
            host: HostId::new(self.name.as_str()),
            resources: ResourceVector::new(self.cores, self.memory, self.disk, self.gpus),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CategoryDef {
    pub name: String,
    #[serde(default)]
    pub mode: AllocationMode,
    #[serde(default)]
    pub max: PartialResources,
    #[serde(default)]
    pub min: PartialResources,
    #[serde(default)]
    pub first_guess: Option<PartialResources>,
}

impl CategoryDef {
    pub fn to_spec(&self) -> CategorySpec {
        let spec = CategorySpec::default_for(self.name.as_str())
            .with_mode(self.mode)
            .with_max(self.max)
            .with_min(self.min);
        match self.first_guess {
            Some(guess) => spec.with_first_guess(guess),
            None => spec,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SweepDef {
    #[serde(default)]
    pub category: Option<String>,
    /// Command template, `{name}` is replaced by the value of parameter `name`.
    pub command: String,
    #[serde(default)]
    pub cores: Option<i64>,
    #[serde(default)]
    pub memory: Option<i64>,
    #[serde(default)]
    pub disk: Option<i64>,
    #[serde(default)]
    pub gpus: Option<i64>,
    #[serde(default)]
    pub inputs: Vec<BindingDef>,
    #[serde(default)]
    pub outputs: Vec<BindingDef>,
    #[serde(default, rename = "param")]
    pub params: Vec<ParamDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BindingDef {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParamDef {
    pub name: String,
    #[serde(default)]
    pub values: Option<Vec<toml::Value>>,
    #[serde(default)]
    pub range: Option<RangeDef>,
}

/// `start..stop` with the given step; every value is divided by `divisor`
/// when it is set.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RangeDef {
    pub start: i64,
    pub stop: i64,
    #[serde(default = "default_step")]
    pub step: i64,
    #[serde(default)]
    pub divisor: Option<i64>,
}

fn default_step() -> i64 {
    1
}

impl GridConfig {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::GenericError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> crate::Result<Self> {
        let config: GridConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        let mut names = Set::default();
        for worker in &self.workers {
            if worker.name.is_empty() {
                return error("Worker name cannot be empty".to_string());
            }
            if !names.insert(worker.name.as_str()) {
                return error(format!("Worker `{}` is defined more than once", worker.name));
            }
        }
        let mut names = Set::default();
        for category in &self.categories {
            if !names.insert(category.name.as_str()) {
                return error(format!(
                    "Category `{}` is defined more than once",
                    category.name
                ));
            }
        }
        if self.dispatch.max_attempts == Some(0) {
            return error("dispatch.max-attempts has to be at least 1".to_string());
        }
        if self.dispatch.poll_interval.is_zero() {
            return error("dispatch.poll-interval cannot be zero".to_string());
        }
        Ok(())
    }

    /// Registers every configured category; invalid definitions are rejected.
    pub fn build_registry(&self) -> crate::Result<CategoryRegistry> {
        let registry = CategoryRegistry::new();
        for category in &self.categories {
            registry.set_category(category.to_spec())?;
        }
        Ok(registry)
    }
}
