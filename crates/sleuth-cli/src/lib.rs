//! Sleuth CLI library
//!
//! Command-line interface for the Sleuth verification engine.
//!
//! ## Usage
//!
//! ```bash
//! sleuth check-config -c sleuth.yaml      # Validate a config file
//! sleuth run -c sleuth.yaml --report r.json  # Full workflow (feature `browser`)
//! sleuth compare first.html second.html   # Offline idempotency check
//! sleuth tally report.html                # Result counts of an artifact
//! sleuth reconcile ui.json report.json    # Compare two tallies
//! sleuth mail --subject "verification"    # Recent matching messages
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::format_push_string)] // String building is clear and correct
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod logging;
mod output;

pub use commands::{
    CheckConfigArgs, Cli, ColorArg, Commands, CompareArgs, FormatArg, LogFormatArg, MailArgs,
    ReconcileArgs, RunArgs, TallyArgs,
};
pub use config::{CliConfig, ColorChoice, LogFormat, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, Reporter};
