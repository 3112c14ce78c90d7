//! CLI command definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sleuth: end-to-end verification of sign-in, analysis and results
#[derive(Parser, Debug)]
#[command(name = "sleuth")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except failures
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full sign-in and analysis workflow in a browser
    Run(RunArgs),

    /// Load, complete from the environment and validate a config file
    CheckConfig(CheckConfigArgs),

    /// Compare two downloaded artifacts by normalized text
    Compare(CompareArgs),

    /// Print the tally of a downloaded artifact
    Tally(TallyArgs),

    /// Reconcile two tallies stored as JSON objects
    Reconcile(ReconcileArgs),

    /// List mailbox messages matching the sign-in code subjects
    Mail(MailArgs),
}

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file
    #[arg(short, long, env = "SLEUTH_CONFIG", default_value = "sleuth.yaml")]
    pub config: PathBuf,

    /// Write the JSON run report here
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Override the factors to analyze (repeatable)
    #[arg(long = "factor")]
    pub factors: Vec<String>,
}

/// Arguments for `check-config`
#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Config file
    #[arg(short, long, env = "SLEUTH_CONFIG", default_value = "sleuth.yaml")]
    pub config: PathBuf,

    /// Only check what mailbox access needs
    #[arg(long)]
    pub mail_only: bool,

    /// Print the effective configuration as YAML
    #[arg(long)]
    pub show: bool,
}

/// Arguments for `compare`
#[derive(Args, Debug)]
pub struct CompareArgs {
    /// First artifact
    pub first: PathBuf,

    /// Second artifact
    pub second: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for `tally`
#[derive(Args, Debug)]
pub struct TallyArgs {
    /// Artifact to tally
    pub file: PathBuf,

    /// Take the tally rule from this config file
    #[arg(short, long, conflicts_with_all = ["selector", "prefix"])]
    pub config: Option<PathBuf>,

    /// CSS selector of the result table
    #[arg(long, conflicts_with = "prefix")]
    pub selector: Option<String>,

    /// Cell index holding the key (0-based)
    #[arg(long, default_value = "1")]
    pub column: usize,

    /// First-word prefix of result lines
    #[arg(long)]
    pub prefix: Option<String>,

    /// Word index holding the key
    #[arg(long, default_value = "1")]
    pub key_index: usize,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for `reconcile`
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Observed tally (JSON object of key to count)
    pub observed: PathBuf,

    /// Reference tally (JSON object of key to count)
    pub reference: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for `mail`
#[derive(Args, Debug)]
pub struct MailArgs {
    /// Config file
    #[arg(short, long, env = "SLEUTH_CONFIG", default_value = "sleuth.yaml")]
    pub config: PathBuf,

    /// Subject substring to match instead of the configured code subjects
    /// (repeatable)
    #[arg(long = "subject")]
    pub subjects: Vec<String>,

    /// How far back to look, in minutes
    #[arg(long, default_value = "60")]
    pub since_minutes: u32,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Output format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum FormatArg {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

impl From<FormatArg> for crate::output::OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl From<LogFormatArg> for crate::config::LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}
