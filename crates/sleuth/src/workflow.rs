//! Stage sequencing with per-stage failure policy.
//!
//! The orchestrator, not the stage, decides what a failure means. A
//! fail-soft stage records its failure and the run continues; a fail-hard
//! stage aborts the rest of the run. Either way the failure is logged and a
//! failure screenshot is taken. Cleanup runs on every path and its own
//! failures are only recorded.

use crate::clock::{duration_ms, SharedClock};
use crate::driver::UiDriver;
use crate::result::{SleuthError, SleuthResult};
use crate::screenshot::{ScreenshotRecorder, ShotStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What a stage failure does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePolicy {
    /// Record and continue
    FailSoft,
    /// Record and abort
    FailHard,
}

impl fmt::Display for StagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailSoft => "fail_soft",
            Self::FailHard => "fail_hard",
        })
    }
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    /// Completed
    Passed,
    /// Did not complete
    Failed {
        /// Error text
        reason: String,
    },
    /// Not attempted
    Skipped {
        /// Why
        reason: String,
    },
}

/// One stage in the run report
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    /// Stage name
    pub name: String,
    /// Policy applied
    pub policy: StagePolicy,
    /// Outcome
    #[serde(flatten)]
    pub status: StageStatus,
    /// Clock time spent
    #[serde(rename = "elapsed_ms", serialize_with = "duration_ms::serialize")]
    pub elapsed: Duration,
    /// Screenshot taken for this stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl StageRecord {
    /// Whether the stage passed
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.status, StageStatus::Passed)
    }

    /// Whether the stage failed
    #[must_use]
    pub const fn failed(&self) -> bool {
        matches!(self.status, StageStatus::Failed { .. })
    }
}

/// Everything a workflow run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Stages in execution order
    pub stages: Vec<StageRecord>,
    /// Fail-hard stage that stopped the run
    pub aborted_at: Option<String>,
    /// Cleanup failures, never escalated
    pub cleanup_errors: Vec<String>,
}

impl RunReport {
    /// No stage failed and the run was not aborted
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.aborted_at.is_none() && !self.stages.iter().any(StageRecord::failed)
    }

    /// Failed stages
    #[must_use]
    pub fn failures(&self) -> Vec<&StageRecord> {
        self.stages.iter().filter(|s| s.failed()).collect()
    }

    /// Count passed stages
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Record for a stage name, last occurrence
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|s| s.name == name)
    }
}

/// Runs named stages and applies their policies
#[derive(Debug)]
pub struct WorkflowOrchestrator {
    clock: SharedClock,
    overrides: BTreeMap<String, StagePolicy>,
    screenshots: Option<ScreenshotRecorder>,
    capture_success: bool,
    report: RunReport,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator without screenshots
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            overrides: BTreeMap::new(),
            screenshots: None,
            capture_success: false,
            report: RunReport::default(),
        }
    }

    /// Replace a stage's default policy
    #[must_use]
    pub fn with_policy(mut self, stage: impl Into<String>, policy: StagePolicy) -> Self {
        self.overrides.insert(stage.into(), policy);
        self
    }

    /// Replace several default policies
    #[must_use]
    pub fn with_policies(mut self, policies: &BTreeMap<String, StagePolicy>) -> Self {
        self.overrides
            .extend(policies.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    /// Capture failure screenshots, and success ones when `on_success`
    #[must_use]
    pub fn with_screenshots(mut self, recorder: ScreenshotRecorder, on_success: bool) -> Self {
        self.screenshots = Some(recorder);
        self.capture_success = on_success;
        self
    }

    /// Effective policy for a stage. A qualified name such as
    /// `reconcile:Security` falls back to the override for `reconcile`.
    #[must_use]
    pub fn policy_for(&self, stage: &str, default: StagePolicy) -> StagePolicy {
        self.overrides
            .get(stage)
            .or_else(|| {
                stage
                    .split_once(':')
                    .and_then(|(base, _)| self.overrides.get(base))
            })
            .copied()
            .unwrap_or(default)
    }

    /// Report so far
    #[must_use]
    pub const fn report(&self) -> &RunReport {
        &self.report
    }

    /// Whether a fail-hard stage already aborted the run
    #[must_use]
    pub const fn aborted(&self) -> bool {
        self.report.aborted_at.is_some()
    }

    /// Run one stage.
    ///
    /// Returns `Ok(Some(value))` when it passed and `Ok(None)` when a
    /// fail-soft stage failed or the run was already aborted.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::StageFailure`] when a fail-hard stage failed;
    /// callers propagate it to stop the run
    pub fn stage<U, T, F>(
        &mut self,
        ui: &mut U,
        name: &str,
        default: StagePolicy,
        run: F,
    ) -> SleuthResult<Option<T>>
    where
        U: UiDriver + ?Sized,
        F: FnOnce(&mut U) -> SleuthResult<T>,
    {
        let policy = self.policy_for(name, default);
        if let Some(aborted_at) = &self.report.aborted_at {
            let reason = format!("run aborted at '{aborted_at}'");
            self.record(name, policy, StageStatus::Skipped { reason }, Duration::ZERO, None);
            return Ok(None);
        }

        tracing::info!(stage = name, %policy, "stage started");
        let start = self.clock.now();
        let result = run(ui);
        let elapsed = self.clock.since(start);

        match result {
            Ok(value) => {
                tracing::info!(
                    stage = name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "stage passed"
                );
                let shot = if self.capture_success {
                    self.capture(ui, ShotStatus::Success, name)
                } else {
                    None
                };
                self.record(name, policy, StageStatus::Passed, elapsed, shot);
                Ok(Some(value))
            }
            Err(err) => {
                let reason = match err {
                    SleuthError::StageFailure { message, .. } => message,
                    other => other.to_string(),
                };
                tracing::error!(
                    stage = name,
                    %policy,
                    elapsed_ms = elapsed.as_millis() as u64,
                    reason = %reason,
                    "stage failed"
                );
                let shot = self.capture(ui, ShotStatus::Failure, name);
                self.record(
                    name,
                    policy,
                    StageStatus::Failed {
                        reason: reason.clone(),
                    },
                    elapsed,
                    shot,
                );
                match policy {
                    StagePolicy::FailSoft => Ok(None),
                    StagePolicy::FailHard => {
                        self.report.aborted_at = Some(name.to_string());
                        Err(SleuthError::stage(name, reason))
                    }
                }
            }
        }
    }

    /// Record a stage that was not attempted
    pub fn skip(&mut self, name: &str, default: StagePolicy, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(stage = name, reason = %reason, "stage skipped");
        let policy = self.policy_for(name, default);
        self.record(name, policy, StageStatus::Skipped { reason }, Duration::ZERO, None);
    }

    /// Run cleanup and hand back the report. Cleanup failures are logged and
    /// recorded; they never change the outcome of the stages before them.
    pub fn finish<F>(mut self, cleanup: F) -> RunReport
    where
        F: FnOnce() -> SleuthResult<()>,
    {
        let start = self.clock.now();
        let status = match cleanup() {
            Ok(()) => StageStatus::Passed,
            Err(err) => {
                tracing::warn!(stage = "cleanup", error = %err, "cleanup failed");
                self.report.cleanup_errors.push(err.to_string());
                StageStatus::Skipped {
                    reason: format!("cleanup incomplete: {err}"),
                }
            }
        };
        let elapsed = self.clock.since(start);
        self.record("cleanup", StagePolicy::FailSoft, status, elapsed, None);

        tracing::info!(
            passed = self.report.passed_count(),
            failed = self.report.failures().len(),
            aborted_at = ?self.report.aborted_at,
            "workflow finished"
        );
        self.report
    }

    fn capture<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        status: ShotStatus,
        tag: &str,
    ) -> Option<PathBuf> {
        self.screenshots
            .as_ref()
            .and_then(|recorder| recorder.capture(ui, status, tag))
    }

    fn record(
        &mut self,
        name: &str,
        policy: StagePolicy,
        status: StageStatus,
        elapsed: Duration,
        screenshot: Option<PathBuf>,
    ) {
        self.report.stages.push(StageRecord {
            name: name.to_string(),
            policy,
            status,
            elapsed,
            screenshot,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::driver::MockUi;
    use tempfile::TempDir;

    fn orchestrator(clock: &FakeClock) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(clock.shared())
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_passed_stage_returns_value() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            let mut ui = MockUi::new();
            let value = orch
                .stage(&mut ui, "upload", StagePolicy::FailHard, |_| Ok(7))
                .unwrap();
            assert_eq!(value, Some(7));
            assert!(orch.report().stage("upload").unwrap().passed());
        }

        #[test]
        fn test_fail_soft_continues() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            let mut ui = MockUi::new();
            let value: Option<()> = orch
                .stage(&mut ui, "reconcile", StagePolicy::FailSoft, |_| {
                    Err(SleuthError::stage("reconcile", "High: observed 3 vs reference 2"))
                })
                .unwrap();
            assert!(value.is_none());
            assert!(!orch.aborted());

            let next = orch
                .stage(&mut ui, "logout", StagePolicy::FailSoft, |_| Ok(()))
                .unwrap();
            assert!(next.is_some());

            let report = orch.finish(|| Ok(()));
            assert!(!report.succeeded());
            assert_eq!(
                report.failures()[0].status,
                StageStatus::Failed {
                    reason: "High: observed 3 vs reference 2".into()
                }
            );
        }

        #[test]
        fn test_fail_hard_aborts_and_skips_rest() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            let mut ui = MockUi::new();
            let err = orch
                .stage(&mut ui, "sign_in", StagePolicy::FailHard, |_| -> SleuthResult<()> {
                    Err(SleuthError::driver("no email field"))
                })
                .unwrap_err();
            assert!(matches!(err, SleuthError::StageFailure { ref stage, .. } if stage == "sign_in"));

            let mut ran = false;
            let later = orch
                .stage(&mut ui, "upload", StagePolicy::FailHard, |_| {
                    ran = true;
                    Ok(())
                })
                .unwrap();
            assert!(later.is_none());
            assert!(!ran);

            let report = orch.finish(|| Ok(()));
            assert_eq!(report.aborted_at.as_deref(), Some("sign_in"));
            assert!(matches!(
                report.stage("upload").unwrap().status,
                StageStatus::Skipped { .. }
            ));
        }

        #[test]
        fn test_override_changes_policy() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock).with_policy("reconcile", StagePolicy::FailHard);
            let mut ui = MockUi::new();
            let result: SleuthResult<Option<()>> =
                orch.stage(&mut ui, "reconcile", StagePolicy::FailSoft, |_| {
                    Err(SleuthError::stage("reconcile", "mismatch"))
                });
            assert!(result.is_err());
            assert_eq!(orch.report().stages[0].policy, StagePolicy::FailHard);
        }

        #[test]
        fn test_qualified_stage_uses_base_override() {
            let clock = FakeClock::new();
            let orch = orchestrator(&clock).with_policy("upload", StagePolicy::FailSoft);
            assert_eq!(
                orch.policy_for("upload:Power Analysis", StagePolicy::FailHard),
                StagePolicy::FailSoft
            );
            assert_eq!(
                orch.policy_for("submit:Power Analysis", StagePolicy::FailHard),
                StagePolicy::FailHard
            );
        }

        #[test]
        fn test_elapsed_uses_clock() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            let mut ui = MockUi::new();
            let c = clock.clone();
            orch.stage(&mut ui, "await_completion", StagePolicy::FailHard, |_| {
                c.fast_forward(Duration::from_secs(42));
                Ok(())
            })
            .unwrap();
            assert_eq!(orch.report().stages[0].elapsed, Duration::from_secs(42));
        }
    }

    mod cleanup_tests {
        use super::*;

        #[test]
        fn test_cleanup_failure_never_escalates() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            let mut ui = MockUi::new();
            orch.stage(&mut ui, "sign_in", StagePolicy::FailHard, |_| Ok(()))
                .unwrap();
            let report = orch.finish(|| Err(SleuthError::connectivity("logout timed out")));
            assert!(report.succeeded());
            assert_eq!(report.cleanup_errors.len(), 1);
        }

        #[test]
        fn test_cleanup_runs_after_abort() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            let mut ui = MockUi::new();
            let _ = orch.stage(&mut ui, "sign_in", StagePolicy::FailHard, |_| -> SleuthResult<()> {
                Err(SleuthError::auth("bad"))
            });
            let mut cleaned = false;
            let report = orch.finish(|| {
                cleaned = true;
                ui.quit()
            });
            assert!(cleaned);
            assert!(ui.quit_called);
            assert!(report.stage("cleanup").unwrap().passed());
        }
    }

    mod screenshot_tests {
        use super::*;

        #[test]
        fn test_failure_screenshot_attached() {
            let tmp = TempDir::new().unwrap();
            let clock = FakeClock::new();
            let recorder = ScreenshotRecorder::new(tmp.path(), clock.shared());
            let mut orch = orchestrator(&clock).with_screenshots(recorder, false);
            let mut ui = MockUi::new();

            orch.stage(&mut ui, "welcome_email", StagePolicy::FailSoft, |_| -> SleuthResult<()> {
                Err(SleuthError::stage("welcome_email", "no welcome email"))
            })
            .unwrap();
            orch.stage(&mut ui, "logout", StagePolicy::FailSoft, |_| Ok(()))
                .unwrap();

            let report = orch.finish(|| Ok(()));
            let shot = report.stage("welcome_email").unwrap().screenshot.clone().unwrap();
            assert!(shot.starts_with(tmp.path().join("failure")));
            assert!(report.stage("logout").unwrap().screenshot.is_none());
        }

        #[test]
        fn test_report_json_shape() {
            let clock = FakeClock::new();
            let mut orch = orchestrator(&clock);
            orch.skip("welcome_email", StagePolicy::FailSoft, "existing account");
            let report = orch.finish(|| Ok(()));
            let json = serde_json::to_value(&report).unwrap();
            assert_eq!(json["stages"][0]["status"], "skipped");
            assert_eq!(json["stages"][0]["policy"], "fail_soft");
            assert_eq!(json["stages"][0]["elapsed_ms"], 0);
            assert!(json["aborted_at"].is_null());
        }
    }
}
