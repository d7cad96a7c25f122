use std::io;

use clap::{CommandFactory, FromArgMatches};
use clap_complete::generate;

use gridsweep::commands::{command_allocate, command_hwdetect, command_run};
use gridsweep::common::cli::{GenerateCompletionOpts, RootOptions, SubCommand};
use gridsweep::common::setup::setup_logging;

fn generate_completion(opts: GenerateCompletionOpts) -> anyhow::Result<()> {
    let generator = opts.shell;

    let mut app = RootOptions::command();
    eprintln!("Generating completion file for {generator}...");
    generate(generator, &mut app, "gridsweep".to_string(), &mut io::stdout());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> gridsweep::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);
    let output = top_opts.common.output_mode;

    let result = match top_opts.subcmd {
        SubCommand::Run(opts) => command_run(opts, output).await,
        SubCommand::Allocate(opts) => command_allocate(opts, output),
        SubCommand::HwDetect(opts) => command_hwdetect(opts, output),
        SubCommand::GenerateCompletion(opts) => generate_completion(opts),
    };

    if let Err(e) = result {
        log::error!("{e:?}");
        std::process::exit(1);
    }

    Ok(())
}
