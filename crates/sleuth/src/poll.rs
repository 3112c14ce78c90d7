//! Bounded polling.
//!
//! [`BoundedPoller`] is the one "wait until true or give up" loop in Sleuth.
//! The OTP engine, the completion watcher, the artifact store and the mail
//! checks are all built on it.
//!
//! Loop order per attempt:
//!
//! 1. cancelled? stop
//! 2. observe; satisfied? return
//! 3. budget exhausted? stop
//! 4. hard timeout reached? stop
//! 5. cancelled? stop
//! 6. sleep `min(delay(attempt), remaining)` on the injected clock

use crate::backoff::AttemptBudget;
use crate::clock::SharedClock;
use crate::result::{SleuthError, SleuthResult};
use serde::Serialize;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What one observation saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<T> {
    /// The awaited condition holds
    Satisfied(T),
    /// Not yet; carries the value seen so far
    Pending(T),
}

impl<T> Observation<T> {
    /// Build from a predicate result
    pub fn from_bool(satisfied: bool, value: T) -> Self {
        if satisfied {
            Self::Satisfied(value)
        } else {
            Self::Pending(value)
        }
    }

    /// Whether the condition holds
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }

    /// The carried value
    pub fn into_value(self) -> T {
        match self {
            Self::Satisfied(v) | Self::Pending(v) => v,
        }
    }
}

/// Why a poll stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Condition observed
    Satisfied,
    /// Attempt budget used up
    Exhausted,
    /// Hard timeout elapsed
    TimedOut,
    /// Cancellation token fired
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Satisfied => "satisfied",
            Self::Exhausted => "exhausted",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of one poll. Produced once and handed to the caller.
#[derive(Debug, Clone)]
pub struct PollOutcome<T> {
    /// Whether the condition was observed
    pub satisfied: bool,
    /// Observation calls made
    pub attempts: u32,
    /// Clock time spent in the poll
    pub elapsed: Duration,
    /// Last value observed (None if no attempt succeeded)
    pub last_observed: Option<T>,
    /// Why the loop stopped
    pub stop_reason: StopReason,
}

impl<T> PollOutcome<T> {
    /// The satisfying value, if any
    pub fn into_satisfied(self) -> Option<T> {
        if self.satisfied {
            self.last_observed
        } else {
            None
        }
    }
}

/// Cooperative cancellation, checked only at attempt boundaries.
///
/// A child token is cancelled when it or its parent is; cancelling the child
/// leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Fresh, not cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also observes `self`
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.cancelled)),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested here or on the parent
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }
}

/// Generic bounded poller over an injected clock.
#[derive(Debug, Clone)]
pub struct BoundedPoller {
    clock: SharedClock,
    label: String,
}

impl BoundedPoller {
    /// Create a poller
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            label: "poll".to_string(),
        }
    }

    /// Name used in log entries
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The clock this poller sleeps on
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Poll `observe` until it reports satisfied or a stop condition hits.
    ///
    /// A failing `observe` counts as "not yet". The error is surfaced only
    /// when every attempt made failed and the poll was not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::ObservationFailed`] when no attempt produced an
    /// observation.
    pub fn poll<T, F>(
        &self,
        mut observe: F,
        budget: &AttemptBudget,
        hard_timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> SleuthResult<PollOutcome<T>>
    where
        T: Debug,
        F: FnMut() -> SleuthResult<Observation<T>>,
    {
        let start = self.clock.now();
        let mut attempts: u32 = 0;
        let mut failures: u32 = 0;
        let mut last_observed: Option<T> = None;
        let mut last_error: Option<String> = None;

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            attempts += 1;
            match observe() {
                Ok(Observation::Satisfied(value)) => {
                    let elapsed = self.clock.since(start);
                    tracing::debug!(
                        label = %self.label,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "poll satisfied"
                    );
                    return Ok(PollOutcome {
                        satisfied: true,
                        attempts,
                        elapsed,
                        last_observed: Some(value),
                        stop_reason: StopReason::Satisfied,
                    });
                }
                Ok(Observation::Pending(value)) => {
                    last_observed = Some(value);
                }
                Err(err) => {
                    failures += 1;
                    tracing::debug!(label = %self.label, attempt = attempts, error = %err, "observation failed");
                    last_error = Some(err.to_string());
                }
            }

            if budget.exhausted(attempts) {
                break StopReason::Exhausted;
            }

            let elapsed = self.clock.since(start);
            let mut delay = budget.delay(attempts);
            if let Some(limit) = hard_timeout {
                if elapsed >= limit {
                    break StopReason::TimedOut;
                }
                delay = delay.min(limit - elapsed);
            }

            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            self.clock.sleep(delay);
        };

        let elapsed = self.clock.since(start);

        if stop_reason != StopReason::Cancelled && attempts > 0 && failures == attempts {
            let last_error = last_error.unwrap_or_default();
            tracing::warn!(
                label = %self.label,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                last_error = %last_error,
                "every observation failed"
            );
            return Err(SleuthError::ObservationFailed {
                label: self.label.clone(),
                attempts,
                last_error,
            });
        }

        tracing::warn!(
            label = %self.label,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            last = ?last_observed,
            reason = %stop_reason,
            "poll gave up"
        );

        Ok(PollOutcome {
            satisfied: false,
            attempts,
            elapsed,
            last_observed,
            stop_reason,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use proptest::prelude::*;

    fn poller(clock: &FakeClock) -> BoundedPoller {
        BoundedPoller::new(clock.shared()).with_label("test")
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    mod satisfaction_tests {
        use super::*;

        #[test]
        fn test_satisfied_on_third_call() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::new(5, secs(1), 2.0, secs(60)).unwrap();
            let mut calls = 0;
            let outcome = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        Ok(Observation::from_bool(calls == 3, calls))
                    },
                    &budget,
                    None,
                    &CancellationToken::new(),
                )
                .unwrap();

            assert!(outcome.satisfied);
            assert_eq!(outcome.attempts, 3);
            assert_eq!(calls, 3);
            assert_eq!(outcome.last_observed, Some(3));
            assert_eq!(outcome.elapsed, secs(3));
            assert_eq!(outcome.stop_reason, StopReason::Satisfied);
        }

        #[test]
        fn test_first_call_satisfied_no_sleep() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(3, secs(10)).unwrap();
            let outcome = poller(&clock)
                .poll(
                    || Ok(Observation::Satisfied("ok")),
                    &budget,
                    None,
                    &CancellationToken::new(),
                )
                .unwrap();
            assert!(outcome.satisfied);
            assert_eq!(clock.total_slept(), Duration::ZERO);
        }
    }

    mod exhaustion_tests {
        use super::*;

        #[test]
        fn test_never_satisfied_exhausts() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(4, secs(2)).unwrap();
            let mut calls = 0;
            let outcome = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        Ok(Observation::Pending(calls))
                    },
                    &budget,
                    None,
                    &CancellationToken::new(),
                )
                .unwrap();

            assert!(!outcome.satisfied);
            assert_eq!(outcome.attempts, 4);
            assert_eq!(outcome.last_observed, Some(4));
            assert_eq!(outcome.stop_reason, StopReason::Exhausted);
            // No sleep after the final attempt
            assert_eq!(clock.total_slept(), secs(6));
        }

        #[test]
        fn test_hard_timeout_stops_early() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(100, secs(4)).unwrap();
            let outcome = poller(&clock)
                .poll(
                    || Ok(Observation::Pending(())),
                    &budget,
                    Some(secs(10)),
                    &CancellationToken::new(),
                )
                .unwrap();

            assert!(!outcome.satisfied);
            assert_eq!(outcome.stop_reason, StopReason::TimedOut);
            // attempts at t=0,4,8,10
            assert_eq!(outcome.attempts, 4);
            assert_eq!(outcome.elapsed, secs(10));
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_transient_errors_are_retried() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(5, secs(1)).unwrap();
            let mut calls = 0;
            let outcome = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        if calls < 3 {
                            Err(SleuthError::connectivity("reset"))
                        } else {
                            Ok(Observation::Satisfied(calls))
                        }
                    },
                    &budget,
                    None,
                    &CancellationToken::new(),
                )
                .unwrap();
            assert!(outcome.satisfied);
            assert_eq!(outcome.attempts, 3);
        }

        #[test]
        fn test_all_attempts_failing_surfaces_error() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(3, secs(1)).unwrap();
            let result: SleuthResult<PollOutcome<()>> = poller(&clock).poll(
                || Err(SleuthError::transient("unreadable")),
                &budget,
                None,
                &CancellationToken::new(),
            );
            match result {
                Err(SleuthError::ObservationFailed {
                    attempts,
                    last_error,
                    ..
                }) => {
                    assert_eq!(attempts, 3);
                    assert!(last_error.contains("unreadable"));
                }
                other => panic!("unexpected: {other:?}"),
            }
        }

        #[test]
        fn test_mixed_errors_report_unsatisfied() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(3, secs(1)).unwrap();
            let mut calls = 0;
            let outcome = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        if calls == 2 {
                            Ok(Observation::Pending("seen"))
                        } else {
                            Err(SleuthError::transient("blip"))
                        }
                    },
                    &budget,
                    None,
                    &CancellationToken::new(),
                )
                .unwrap();
            assert!(!outcome.satisfied);
            assert_eq!(outcome.last_observed, Some("seen"));
        }
    }

    mod cancellation_tests {
        use super::*;

        #[test]
        fn test_cancelled_before_start() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(3, secs(1)).unwrap();
            let cancel = CancellationToken::new();
            cancel.cancel();
            let mut calls = 0;
            let outcome: PollOutcome<()> = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        Ok(Observation::Pending(()))
                    },
                    &budget,
                    None,
                    &cancel,
                )
                .unwrap();
            assert_eq!(calls, 0);
            assert_eq!(outcome.attempts, 0);
            assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        }

        #[test]
        fn test_cancelled_mid_poll_returns_immediately() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(10, secs(1)).unwrap();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let mut calls = 0;
            let outcome = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        if calls == 2 {
                            trigger.cancel();
                        }
                        Ok(Observation::Pending(calls))
                    },
                    &budget,
                    None,
                    &cancel,
                )
                .unwrap();
            assert!(!outcome.satisfied);
            assert_eq!(outcome.attempts, 2);
            assert_eq!(outcome.stop_reason, StopReason::Cancelled);
            assert_eq!(clock.total_slept(), secs(1));
        }

        #[test]
        fn test_cancel_after_only_failures_is_not_an_error() {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(10, secs(1)).unwrap();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let mut calls = 0;
            let outcome: PollOutcome<()> = poller(&clock)
                .poll(
                    || {
                        calls += 1;
                        if calls == 2 {
                            trigger.cancel();
                        }
                        Err(SleuthError::transient("unreadable"))
                    },
                    &budget,
                    None,
                    &cancel,
                )
                .unwrap();
            assert!(!outcome.satisfied);
            assert_eq!(outcome.attempts, 2);
            assert_eq!(outcome.last_observed, None);
            assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        }
    }

    mod token_tests {
        use super::*;

        #[test]
        fn test_child_sees_parent() {
            let parent = CancellationToken::new();
            let child = parent.child();
            assert!(!child.is_cancelled());
            parent.cancel();
            assert!(child.is_cancelled());
        }

        #[test]
        fn test_parent_ignores_child() {
            let parent = CancellationToken::new();
            let child = parent.child();
            child.cancel();
            assert!(child.is_cancelled());
            assert!(!parent.is_cancelled());
        }
    }

    proptest! {
        #[test]
        fn prop_satisfied_after_exactly_k_calls(k in 1u32..10, extra in 0u32..5, base_ms in 1u64..2_000) {
            let clock = FakeClock::new();
            let budget = AttemptBudget::new(
                k + extra,
                Duration::from_millis(base_ms),
                1.5,
                Duration::from_secs(30),
            ).unwrap();
            let mut calls = 0;
            let outcome = poller(&clock).poll(
                || {
                    calls += 1;
                    Ok(Observation::from_bool(calls == k, ()))
                },
                &budget,
                None,
                &CancellationToken::new(),
            ).unwrap();
            prop_assert!(outcome.satisfied);
            prop_assert_eq!(calls, k);
            prop_assert!(outcome.elapsed >= budget.total_delay(k).saturating_sub(Duration::from_millis(u64::from(k))));
        }

        #[test]
        fn prop_never_satisfied_calls_exactly_n(n in 1u32..20) {
            let clock = FakeClock::new();
            let budget = AttemptBudget::fixed(n, Duration::from_millis(100)).unwrap();
            let mut calls = 0;
            let outcome = poller(&clock).poll(
                || {
                    calls += 1;
                    Ok(Observation::Pending(()))
                },
                &budget,
                None,
                &CancellationToken::new(),
            ).unwrap();
            prop_assert!(!outcome.satisfied);
            prop_assert_eq!(calls, n);
            prop_assert_eq!(outcome.attempts, n);
        }
    }
}
