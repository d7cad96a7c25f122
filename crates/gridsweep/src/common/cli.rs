use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap_complete::Shell;

use crate::common::output::Outputs;

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets output formatting
    #[arg(
        long,
        env = "GRIDSWEEP_OUTPUT_MODE",
        default_value_t = Outputs::Cli,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "GRIDSWEEP_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::GRIDSWEEP_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Run the sweep described by a configuration file
    ///
    /// Exits with status 1 when the sweep stalls, i.e. some tasks can no
    /// longer be placed because every worker that could hold them was
    /// excluded. Failed tasks, including those that ran out of attempts,
    /// are only reported and never change the exit status.
    Run(RunOpts),
    /// Print the allocation a category would receive on a worker
    Allocate(AllocateOpts),
    /// Detect the resources of the local machine
    #[command(name = "hwdetect")]
    HwDetect(HwDetectOpts),
    /// Generate shell completion script
    GenerateCompletion(GenerateCompletionOpts),
}

#[derive(Parser)]
pub struct RunOpts {
    /// Path to the TOML configuration of the sweep
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// How long one wait for a finished task may block
    ///
    /// Overrides `dispatch.poll-interval` of the configuration.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Maximum number of attempts of a single task
    ///
    /// Overrides `dispatch.max-attempts` of the configuration.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Directory where task sandboxes and input caches are created
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Parser)]
pub struct AllocateOpts {
    /// Path to the TOML configuration with category definitions
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Category to compute the allocation for
    #[arg(long)]
    pub category: String,

    /// Worker cores (detected when not given)
    #[arg(long)]
    pub cores: Option<u64>,

    /// Worker memory in MB (detected when not given)
    #[arg(long)]
    pub memory: Option<u64>,

    /// Worker disk in MB (detected when not given)
    #[arg(long)]
    pub disk: Option<u64>,

    /// Worker GPUs (detected when not given)
    #[arg(long)]
    pub gpus: Option<u64>,
}

#[derive(Parser)]
pub struct HwDetectOpts {
    /// Directory whose filesystem is checked for free disk space
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Parser)]
pub struct GenerateCompletionOpts {
    /// Shell flavour for which the completion script should be generated
    #[arg(value_enum)]
    pub shell: Shell,
}
