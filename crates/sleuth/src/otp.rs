//! One-time-code correlation engine.
//!
//! ```text
//! Idle ──request──► AwaitingCode ──match──► CodeFound ──type──► Submitted
//!                     │    ▲                                     │      │
//!                     │    └──resend, new window                 ▼      ▼
//!                     └──cycles exhausted──────────────────► Failed  Verified
//! ```
//!
//! Each cycle opens a [`TimeWindow`] and polls the mailbox with its own
//! [`AttemptBudget`]. A resend never reuses the old window: the new one starts
//! at `max(now, previous.start)` and anything received before it is ignored.

use crate::backoff::AttemptBudget;
use crate::mailbox::{CandidateMessage, MailboxSearchClient, SubjectAllowList};
use crate::poll::{BoundedPoller, CancellationToken, Observation, StopReason};
use crate::result::{SleuthError, SleuthResult};
use crate::text::readable_text;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default number of request/resend cycles
pub const DEFAULT_CYCLES: u32 = 3;

/// Consecutive credential rejections that end the run
pub const AUTH_FAILURE_LIMIT: u32 = 2;

/// UI side of the code exchange
pub trait OtpUi {
    /// Trigger the first code email
    fn request_code(&mut self) -> SleuthResult<()>;

    /// Ask for another code
    fn resend_code(&mut self) -> SleuthResult<()>;

    /// Type and submit a code
    fn submit_code(&mut self, code: &str) -> SleuthResult<()>;

    /// Whether the UI shows the code was accepted
    fn confirm_accepted(&mut self) -> SleuthResult<bool>;
}

/// Pulls a fixed-length numeric code out of a message body
#[derive(Debug, Clone)]
pub struct CodeExtractor {
    length: usize,
    pattern: Regex,
}

impl CodeExtractor {
    /// Extractor for `length`-digit codes
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Config`] when `length` is zero
    pub fn new(length: usize) -> SleuthResult<Self> {
        if length == 0 {
            return Err(SleuthError::config("code length must be at least 1"));
        }
        let pattern = Regex::new(&format!(r"\b\d{{{length}}}\b"))
            .map_err(|e| SleuthError::config(format!("code pattern: {e}")))?;
        Ok(Self { length, pattern })
    }

    /// Code length
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    /// First structurally valid code in the body, markup stripped
    #[must_use]
    pub fn extract(&self, body: &str) -> Option<String> {
        let text = readable_text(body);
        self.pattern.find(&text).map(|m| m.as_str().to_string())
    }
}

/// Search window for one request/resend cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    /// Earliest acceptable receive time
    pub start: DateTime<Utc>,
    /// Expected sender
    pub sender: String,
}

impl TimeWindow {
    /// First window
    pub fn open(now: DateTime<Utc>, sender: impl Into<String>) -> Self {
        Self {
            start: now,
            sender: sender.into(),
        }
    }

    /// Window for the next cycle; `start` never moves backwards
    #[must_use]
    pub fn advance(&self, now: DateTime<Utc>) -> Self {
        Self {
            start: now.max(self.start),
            sender: self.sender.clone(),
        }
    }

    /// Whether a message may be selected in this window
    #[must_use]
    pub fn admits(&self, message: &CandidateMessage) -> bool {
        message.received_at >= self.start && message.sender.eq_ignore_ascii_case(&self.sender)
    }
}

/// A code and the message it came from. Consumed by submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    /// Code digits
    pub value: String,
    /// Source message
    pub extracted_from: CandidateMessage,
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpState {
    /// Nothing requested yet
    Idle,
    /// Waiting for mail in the current window
    AwaitingCode,
    /// Code extracted, not yet typed
    CodeFound,
    /// Code typed and submitted
    Submitted,
    /// UI confirmed the code
    Verified,
    /// Terminal failure
    Failed,
}

impl fmt::Display for OtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingCode => "awaiting_code",
            Self::CodeFound => "code_found",
            Self::Submitted => "submitted",
            Self::Verified => "verified",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OtpOutcome {
    /// Code accepted
    Verified {
        /// Subject of the message that carried the code
        subject: String,
        /// When that message arrived
        received_at: DateTime<Utc>,
    },
    /// No code accepted
    Failed {
        /// Why
        reason: String,
    },
}

/// Everything one engine run did
#[derive(Debug, Clone, Serialize)]
pub struct OtpReport {
    /// Final outcome
    pub outcome: OtpOutcome,
    /// Windows opened, in order
    pub windows: Vec<TimeWindow>,
    /// Mailbox searches issued
    pub search_calls: u32,
    /// Request/resend cycles started
    pub cycles: u32,
    /// States visited, in order
    pub states: Vec<OtpState>,
}

impl OtpReport {
    /// Whether the code was accepted
    #[must_use]
    pub const fn verified(&self) -> bool {
        matches!(self.outcome, OtpOutcome::Verified { .. })
    }

    /// Convert a failed outcome into a stage error
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::StageFailure`] when not verified
    pub fn into_result(self, stage: &str) -> SleuthResult<Self> {
        match &self.outcome {
            OtpOutcome::Verified { .. } => Ok(self),
            OtpOutcome::Failed { reason } => Err(SleuthError::stage(stage, reason.clone())),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct OtpSettings {
    /// Expected sender
    pub sender: String,
    /// Subjects that may carry a code
    pub subjects: SubjectAllowList,
    /// Code shape
    pub extractor: CodeExtractor,
    /// Request/resend cycles
    pub cycles: u32,
    /// Mailbox poll budget per window
    pub window_budget: AttemptBudget,
    /// Hard limit per window
    pub window_timeout: Option<Duration>,
}

impl OtpSettings {
    /// Settings with default cycles and a 6 x 10s window budget
    ///
    /// # Errors
    ///
    /// Returns error on an invalid code length
    pub fn new(sender: impl Into<String>, subjects: SubjectAllowList) -> SleuthResult<Self> {
        Ok(Self {
            sender: sender.into(),
            subjects,
            extractor: CodeExtractor::new(6)?,
            cycles: DEFAULT_CYCLES,
            window_budget: AttemptBudget::fixed(6, Duration::from_secs(10))?,
            window_timeout: None,
        })
    }

    /// Set code length
    ///
    /// # Errors
    ///
    /// Returns error when `length` is zero
    pub fn with_code_length(mut self, length: usize) -> SleuthResult<Self> {
        self.extractor = CodeExtractor::new(length)?;
        Ok(self)
    }

    /// Set cycle count (at least 1)
    #[must_use]
    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles.max(1);
        self
    }

    /// Set per-window budget
    #[must_use]
    pub const fn with_window_budget(mut self, budget: AttemptBudget) -> Self {
        self.window_budget = budget;
        self
    }

    /// Set per-window hard timeout
    #[must_use]
    pub const fn with_window_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.window_timeout = timeout;
        self
    }
}

/// The correlation engine. One instance per sign-in attempt.
#[derive(Debug)]
pub struct OneTimeCodeEngine {
    poller: BoundedPoller,
    settings: OtpSettings,
    state: OtpState,
    states: Vec<OtpState>,
}

impl OneTimeCodeEngine {
    /// Create an engine in `Idle`
    #[must_use]
    pub fn new(poller: BoundedPoller, settings: OtpSettings) -> Self {
        Self {
            poller: poller.with_label("otp_mailbox"),
            settings,
            state: OtpState::Idle,
            states: vec![OtpState::Idle],
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> OtpState {
        self.state
    }

    fn enter(&mut self, next: OtpState) {
        tracing::debug!(from = %self.state, to = %next, "otp transition");
        self.state = next;
        self.states.push(next);
    }

    /// First acceptable code in newest-first `messages`
    fn select(&self, window: &TimeWindow, messages: &[CandidateMessage]) -> Option<OneTimeCode> {
        messages
            .iter()
            .filter(|m| window.admits(m))
            .filter(|m| self.settings.subjects.matches(&m.subject))
            .find_map(|m| {
                self.settings
                    .extractor
                    .extract(&m.body)
                    .map(|value| OneTimeCode {
                        value,
                        extracted_from: m.clone(),
                    })
            })
    }

    /// Drive the exchange to `Verified` or `Failed`.
    pub fn run<U, M>(
        &mut self,
        ui: &mut U,
        mailbox: &mut M,
        cancel: &CancellationToken,
    ) -> OtpReport
    where
        U: OtpUi + ?Sized,
        M: MailboxSearchClient + ?Sized,
    {
        let mut windows: Vec<TimeWindow> = Vec::new();
        let mut search_calls: u32 = 0;
        let mut cycles: u32 = 0;
        let mut consecutive_auth: u32 = 0;

        let outcome = 'cycles: {
            if let Err(err) = ui.request_code() {
                break 'cycles self.fail(format!("requesting a code failed: {err}"));
            }

            let mut window = TimeWindow::open(self.poller.clock().now(), &self.settings.sender);

            for cycle in 1..=self.settings.cycles {
                cycles = cycle;
                if cycle > 1 {
                    if let Err(err) = ui.resend_code() {
                        break 'cycles self.fail(format!("resending the code failed: {err}"));
                    }
                    window = window.advance(self.poller.clock().now());
                }
                windows.push(window.clone());
                self.enter(OtpState::AwaitingCode);
                tracing::info!(cycle, window_start = %window.start, "awaiting one-time code");

                let auth_stop = cancel.child();
                let poll = self.poller.poll(
                    || {
                        search_calls += 1;
                        match mailbox.search(&window.sender, &self.settings.subjects, window.start) {
                            Ok(mut messages) => {
                                consecutive_auth = 0;
                                messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
                                let found = self.select(&window, &messages);
                                Ok(Observation::from_bool(found.is_some(), found))
                            }
                            Err(err) => {
                                if err.is_auth() {
                                    consecutive_auth += 1;
                                    if consecutive_auth >= AUTH_FAILURE_LIMIT {
                                        auth_stop.cancel();
                                    }
                                } else {
                                    consecutive_auth = 0;
                                }
                                Err(err)
                            }
                        }
                    },
                    &self.settings.window_budget,
                    self.settings.window_timeout,
                    &auth_stop,
                );

                let auth_fatal = consecutive_auth >= AUTH_FAILURE_LIMIT;
                let code = match poll {
                    Ok(outcome) if outcome.satisfied => outcome.into_satisfied().flatten(),
                    Ok(outcome) if outcome.stop_reason == StopReason::Cancelled => {
                        break 'cycles self.fail(if auth_fatal {
                            "mailbox credentials rejected repeatedly".to_string()
                        } else {
                            "cancelled".to_string()
                        });
                    }
                    Ok(_) => None,
                    Err(err) if auth_fatal => {
                        break 'cycles self
                            .fail(format!("mailbox credentials rejected repeatedly: {err}"));
                    }
                    Err(err) => {
                        tracing::warn!(cycle, error = %err, "mailbox unreachable for whole window");
                        None
                    }
                };

                let Some(code) = code else {
                    continue;
                };

                self.enter(OtpState::CodeFound);
                break 'cycles self.submit(ui, code);
            }

            self.fail(format!(
                "no code arrived within {} window(s)",
                self.settings.cycles
            ))
        };

        if let OtpOutcome::Failed { reason } = &outcome {
            tracing::error!(
                stage = "otp",
                cycles,
                search_calls,
                last_state = %self.state,
                reason = %reason,
                "one-time code exchange failed"
            );
        }

        OtpReport {
            outcome,
            windows,
            search_calls,
            cycles,
            states: self.states.clone(),
        }
    }

    fn submit<U: OtpUi + ?Sized>(&mut self, ui: &mut U, code: OneTimeCode) -> OtpOutcome {
        let OneTimeCode {
            value,
            extracted_from,
        } = code;
        tracing::info!(subject = %extracted_from.subject, received_at = %extracted_from.received_at, "submitting one-time code");

        if let Err(err) = ui.submit_code(&value) {
            return self.fail(format!("submitting the code failed: {err}"));
        }
        // Single use: the value is gone once submitted
        drop(value);
        self.enter(OtpState::Submitted);

        match ui.confirm_accepted() {
            Ok(true) => {
                self.enter(OtpState::Verified);
                OtpOutcome::Verified {
                    subject: extracted_from.subject,
                    received_at: extracted_from.received_at,
                }
            }
            Ok(false) => self.fail("code rejected".to_string()),
            Err(err) => self.fail(format!("reading the verification result failed: {err}")),
        }
    }

    fn fail(&mut self, reason: String) -> OtpOutcome {
        self.enter(OtpState::Failed);
        OtpOutcome::Failed { reason }
    }
}
