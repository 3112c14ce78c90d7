//! Tracing subscriber setup.
//!
//! `SLEUTH_LOG` takes an `EnvFilter` directive (`sleuth=debug,info`). When it
//! is unset the level follows `-q`/`-v`. Events go to stderr so stdout stays
//! clean for reports.

use crate::config::{CliConfig, LogFormat};
use crate::error::{CliError, CliResult};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "SLEUTH_LOG";

/// Filter directive: the environment wins over verbosity
#[must_use]
pub fn filter_directive(config: &CliConfig, env: Option<&str>) -> String {
    env.map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| config.verbosity.log_level().to_string(), str::to_string)
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns [`CliError::Config`] on an invalid filter or when a subscriber is
/// already installed
pub fn init(config: &CliConfig) -> CliResult<()> {
    let env = std::env::var(LOG_ENV).ok();
    let directive = filter_directive(config, env.as_deref());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| CliError::config(format!("invalid {LOG_ENV} '{directive}': {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(config.verbosity.is_debug());

    let installed = match config.log_format {
        LogFormat::Text => builder
            .with_ansi(config.color.should_color())
            .try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| CliError::config(format!("logging: {e}")))
}
