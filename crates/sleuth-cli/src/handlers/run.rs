//! Run command handler

use crate::error::{CliError, CliResult};
use crate::output::Reporter;
use crate::RunArgs;
use sleuth::{RunConfig, RunReport};
use std::path::Path;

/// Execute the run command. A run with any failed stage is an error.
pub fn execute_run(reporter: &Reporter, args: &RunArgs) -> CliResult<()> {
    let mut config = RunConfig::load(&args.config)?;
    apply_overrides(&mut config, args);
    config.validate()?;

    reporter.info(&format!(
        "running {} factor(s) against {}",
        config.app.factors.len(),
        config.app.login_url
    ));
    let report = run_workflow(&config)?;

    reporter.run_report(&report);
    if let Some(path) = &args.report {
        write_report(path, &report)?;
        reporter.info(&format!("report written to {}", path.display()));
    }
    verdict(&report)
}

/// Flags that override the file
pub fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if !args.factors.is_empty() {
        config.app.factors.clone_from(&args.factors);
    }
    if args.headed {
        config.app.browser.headless = false;
    }
}

#[cfg(all(feature = "browser", feature = "imap"))]
fn run_workflow(config: &RunConfig) -> CliResult<RunReport> {
    use sleuth::{ChromiumUi, ImapSession, Scenario, SessionSearchClient, SystemClock, UiSession};

    let driver = ChromiumUi::launch(&config.app.browser, &config.app.download_dir)?;
    let mut session = UiSession::new(driver);
    let mut mailbox = SessionSearchClient::new(ImapSession::new(config.mail.imap_settings()));

    let report = Scenario::new(config, SystemClock::shared()).run(&mut session, &mut mailbox);

    if let Err(e) = mailbox.close() {
        tracing::warn!(error = %e, "mailbox disconnect failed");
    }
    Ok(report)
}

#[cfg(not(all(feature = "browser", feature = "imap")))]
fn run_workflow(_config: &RunConfig) -> CliResult<RunReport> {
    let missing = if cfg!(feature = "browser") {
        "imap"
    } else {
        "browser"
    };
    Err(CliError::feature_disabled("run", missing))
}

/// Write the JSON report, creating parent directories
pub fn write_report(path: &Path, report: &RunReport) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Exit status of a finished run
pub fn verdict(report: &RunReport) -> CliResult<()> {
    if report.succeeded() {
        return Ok(());
    }
    let failed: Vec<&str> = report
        .failures()
        .iter()
        .map(|stage| stage.name.as_str())
        .collect();
    let mut message = format!("{} stage(s) failed", failed.len());
    if !failed.is_empty() {
        message.push_str(&format!(": {}", failed.join(", ")));
    }
    if let Some(stage) = &report.aborted_at {
        message.push_str(&format!("; aborted at {stage}"));
    }
    Err(CliError::workflow_failed(message))
}
