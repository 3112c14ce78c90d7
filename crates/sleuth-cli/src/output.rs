//! Output formatting for run reports and command results

use console::{style, Style, Term};
use serde::{Deserialize, Serialize};
use sleuth::{RunReport, StageRecord, StageStatus};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Reporter for stage progress and results.
///
/// Status lines go to stderr; command results go to stdout.
#[derive(Debug)]
pub struct Reporter {
    term: Term,
    out: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl Reporter {
    /// Create a new reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            out: Term::stdout(),
            use_color,
            quiet,
        }
    }

    fn prefixed(&self, symbol: &str, plain: &str, color: Style, message: &str) -> String {
        let prefix = if self.use_color {
            color.bold().apply_to(symbol).to_string()
        } else {
            plain.to_string()
        };
        format!("{prefix} {message}")
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let _ = self
            .term
            .write_line(&self.prefixed("✓", "PASS", Style::new().green(), message));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        let _ = self
            .term
            .write_line(&self.prefixed("✗", "FAIL", Style::new().red(), message));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        let _ = self
            .term
            .write_line(&self.prefixed("⚠", "WARN", Style::new().yellow(), message));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let _ = self
            .term
            .write_line(&self.prefixed("ℹ", "INFO", Style::new().blue(), message));
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        let _ = self.term.write_line("");
        let _ = self.term.write_line(&styled);
    }

    /// Write a result line to stdout
    pub fn emit(&self, line: &str) {
        let _ = self.out.write_line(line);
    }

    /// Print one stage outcome
    pub fn stage(&self, record: &StageRecord) {
        let line = stage_line(record);
        match &record.status {
            StageStatus::Passed => self.success(&line),
            StageStatus::Failed { .. } => self.failure(&line),
            StageStatus::Skipped { .. } => self.info(&line),
        }
    }

    /// Print every stage and the summary
    pub fn run_report(&self, report: &RunReport) {
        self.header("Stages");
        for record in &report.stages {
            self.stage(record);
        }
        for error in &report.cleanup_errors {
            self.warning(&format!("cleanup: {error}"));
        }
        self.summary(report);
    }

    /// Print the run summary
    pub fn summary(&self, report: &RunReport) {
        let failed = report.failures().len();
        if self.quiet && failed == 0 {
            return;
        }

        let _ = self.term.write_line("");
        let line = summary_line(report);
        let styled = if !self.use_color {
            line
        } else if report.succeeded() {
            Style::new().green().bold().apply_to(line).to_string()
        } else {
            Style::new().red().bold().apply_to(line).to_string()
        };
        let _ = self.term.write_line(&styled);
    }
}

/// `name (policy, 1.25s): reason`
#[must_use]
pub fn stage_line(record: &StageRecord) -> String {
    let head = format!(
        "{} ({}, {:.2}s)",
        record.name,
        record.policy,
        record.elapsed.as_secs_f64()
    );
    match &record.status {
        StageStatus::Passed => head,
        StageStatus::Failed { reason } => format!("{head}: {reason}"),
        StageStatus::Skipped { reason } => format!("{head}: skipped, {reason}"),
    }
}

/// One-line verdict with counts
#[must_use]
pub fn summary_line(report: &RunReport) -> String {
    let total = report.stages.len();
    let passed = report.passed_count();
    let failed = report.failures().len();
    let skipped = total - passed - failed;
    let status = if report.succeeded() { "PASSED" } else { "FAILED" };
    let mut line =
        format!("{status} {total} stages ({passed} passed, {failed} failed, {skipped} skipped)");
    if let Some(stage) = &report.aborted_at {
        line.push_str(&format!(", aborted at {stage}"));
    }
    line
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sleuth::StagePolicy;
    use std::time::Duration;

    fn record(name: &str, status: StageStatus) -> StageRecord {
        StageRecord {
            name: name.to_string(),
            policy: StagePolicy::FailSoft,
            status,
            elapsed: Duration::from_millis(1250),
            screenshot: None,
        }
    }

    fn report() -> RunReport {
        RunReport {
            stages: vec![
                record("sign_in", StageStatus::Passed),
                record(
                    "reconcile",
                    StageStatus::Failed {
                        reason: "High: observed 2 vs reference 3".into(),
                    },
                ),
                record(
                    "welcome_email",
                    StageStatus::Skipped {
                        reason: "existing account".into(),
                    },
                ),
            ],
            aborted_at: None,
            cleanup_errors: Vec::new(),
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_default_format() {
            assert_eq!(OutputFormat::default(), OutputFormat::Text);
        }

        #[test]
        fn test_passed_stage_line() {
            let line = stage_line(&record("sign_in", StageStatus::Passed));
            assert_eq!(line, "sign_in (fail_soft, 1.25s)");
        }

        #[test]
        fn test_failed_stage_line_carries_reason() {
            let line = stage_line(&report().stages[1]);
            assert!(line.ends_with(": High: observed 2 vs reference 3"));
        }

        #[test]
        fn test_skipped_stage_line() {
            let line = stage_line(&report().stages[2]);
            assert!(line.ends_with("skipped, existing account"));
        }

        #[test]
        fn test_summary_counts() {
            assert_eq!(
                summary_line(&report()),
                "FAILED 3 stages (1 passed, 1 failed, 1 skipped)"
            );
        }

        #[test]
        fn test_summary_names_abort() {
            let mut report = report();
            report.aborted_at = Some("sign_in".into());
            assert!(summary_line(&report).ends_with(", aborted at sign_in"));
        }
    }

    mod reporter_tests {
        use super::*;

        #[test]
        fn test_new_reporter() {
            let reporter = Reporter::new(true, false);
            assert!(reporter.use_color);
            assert!(!reporter.quiet);
        }

        #[test]
        fn test_prefix_without_color() {
            let reporter = Reporter::new(false, false);
            let line = reporter.prefixed("✓", "PASS", Style::new().green(), "ok");
            assert_eq!(line, "PASS ok");
        }

        #[test]
        fn test_quiet_mode_suppresses_output() {
            let reporter = Reporter::new(false, true);
            reporter.success("hidden");
            reporter.warning("hidden");
            reporter.info("hidden");
            reporter.header("hidden");
            // Failure is still printed
            reporter.failure("shown");
            reporter.run_report(&report());
        }
    }
}
