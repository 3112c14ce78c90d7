//! Sleuth CLI: end-to-end verification from the command line
//!
//! ## Usage
//!
//! ```bash
//! sleuth run -c sleuth.yaml       # Full workflow
//! sleuth check-config             # Validate sleuth.yaml
//! sleuth compare a.html b.html    # Idempotency check
//! ```

use clap::Parser;
use sleuth_cli::{handlers, logging, Cli, CliConfig, CliResult, Commands, Reporter, Verbosity};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    // Build configuration from CLI args
    let config = build_config(&cli);
    logging::init(&config)?;

    let reporter = Reporter::new(config.color.should_color(), config.verbosity.is_quiet());

    match cli.command {
        Commands::Run(args) => handlers::execute_run(&reporter, &args),
        Commands::CheckConfig(args) => handlers::execute_check_config(&reporter, &args),
        Commands::Compare(args) => handlers::execute_compare(&reporter, &args),
        Commands::Tally(args) => handlers::execute_tally(&reporter, &args),
        Commands::Reconcile(args) => handlers::execute_reconcile(&reporter, &args),
        Commands::Mail(args) => handlers::execute_mail(&reporter, &args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into())
        .with_log_format(cli.log_format.into())
}
