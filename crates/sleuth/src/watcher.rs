//! Task completion watcher.
//!
//! Server-side analysis is only visible as a busy indicator (spinner) with an
//! optional status line next to it. The watcher polls both and reports the
//! last status text once the indicator is gone.

use crate::backoff::AttemptBudget;
use crate::clock::duration_ms;
use crate::driver::{Locator, UiDriver};
use crate::poll::{BoundedPoller, CancellationToken, Observation};
use crate::result::SleuthResult;
use serde::Serialize;
use std::time::Duration;

/// What the watcher saw
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionStatus {
    /// Indicator gone before the deadline
    pub indicator_cleared: bool,
    /// Last status text captured while busy
    pub last_message: Option<String>,
    /// Distinct status texts, in order of appearance
    pub messages: Vec<String>,
    /// Poll attempts
    pub attempts: u32,
    /// Time spent
    #[serde(serialize_with = "duration_ms::serialize")]
    pub elapsed: Duration,
}

/// Watches a busy indicator until it clears
#[derive(Debug, Clone)]
pub struct TaskCompletionWatcher {
    poller: BoundedPoller,
    indicator: Locator,
    message: Option<Locator>,
    interval: Duration,
}

#[derive(Debug, Default)]
struct Seen {
    last: Option<String>,
    messages: Vec<String>,
}

impl TaskCompletionWatcher {
    /// Watch `indicator`, polling every `interval`
    #[must_use]
    pub fn new(poller: BoundedPoller, indicator: Locator, interval: Duration) -> Self {
        Self {
            poller: poller.with_label("completion"),
            indicator,
            message: None,
            interval,
        }
    }

    /// Also read a status message while busy
    #[must_use]
    pub fn with_message(mut self, message: Locator) -> Self {
        self.message = Some(message);
        self
    }

    fn budget(&self) -> AttemptBudget {
        // The hard timeout is the real limit
        AttemptBudget::fixed(u32::MAX, self.interval).unwrap_or_else(|_| AttemptBudget::once())
    }

    /// Wait until the indicator is absent or `max_wait` elapses.
    ///
    /// Read errors count as "still busy".
    ///
    /// # Errors
    ///
    /// Returns `ObservationFailed` only when every read failed
    pub fn await_completion<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> SleuthResult<CompletionStatus> {
        let mut seen = Seen::default();
        let outcome = self.poller.poll(
            || {
                if ui.find(&self.indicator)?.is_none() {
                    return Ok(Observation::Satisfied(seen.last.clone()));
                }
                if let Some(locator) = &self.message {
                    match ui.text_of(locator) {
                        Ok(Some(text)) => {
                            let text = text.trim().to_string();
                            if !text.is_empty() && seen.last.as_deref() != Some(text.as_str()) {
                                tracing::info!(status = %text, "analysis status");
                                seen.messages.push(text.clone());
                                seen.last = Some(text);
                            }
                        }
                        Ok(None) => {}
                        Err(err) => tracing::debug!(error = %err, "status message unreadable"),
                    }
                }
                Ok(Observation::Pending(seen.last.clone()))
            },
            &self.budget(),
            Some(max_wait),
            cancel,
        )?;

        if !outcome.satisfied {
            tracing::warn!(
                stage = "await_completion",
                attempts = outcome.attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                last = ?seen.last,
                "busy indicator still present"
            );
        }

        Ok(CompletionStatus {
            indicator_cleared: outcome.satisfied,
            last_message: seen.last,
            messages: seen.messages,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
        })
    }

    /// Page-load settle: give the indicator `appear_within` to show up, then
    /// wait up to `max_wait` for it to clear. An indicator that never shows
    /// counts as settled.
    ///
    /// # Errors
    ///
    /// Returns `ObservationFailed` when the indicator could never be read
    pub fn settle<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        appear_within: Duration,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> SleuthResult<CompletionStatus> {
        let appeared = self.poller.clone().with_label("settle").poll(
            || {
                let present = ui.find(&self.indicator)?.is_some();
                Ok(Observation::from_bool(present, ()))
            },
            &self.budget(),
            Some(appear_within),
            cancel,
        )?;

        if !appeared.satisfied {
            tracing::debug!(indicator = %self.indicator, "loading indicator never appeared");
            return Ok(CompletionStatus {
                indicator_cleared: true,
                last_message: None,
                messages: Vec::new(),
                attempts: appeared.attempts,
                elapsed: appeared.elapsed,
            });
        }

        let mut status = self.await_completion(ui, max_wait, cancel)?;
        status.attempts += appeared.attempts;
        status.elapsed += appeared.elapsed;
        Ok(status)
    }
}
