//! Attempt budgets and exponential backoff.
//!
//! An [`AttemptBudget`] is a pure value: attempt index in, delay out. It is
//! passed explicitly to every polling operation and never mutated mid-run.

use crate::result::{SleuthError, SleuthResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt count and delay schedule for one logical operation.
///
/// Attempts are 1-based. `delay(a) = min(base_delay * multiplier^(a-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttemptBudget {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    cap: Duration,
}

impl AttemptBudget {
    /// Create a budget.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::InvalidBudget`] when `max_attempts < 1` or
    /// `multiplier < 1` (or not finite).
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        multiplier: f64,
        cap: Duration,
    ) -> SleuthResult<Self> {
        if max_attempts < 1 {
            return Err(SleuthError::InvalidBudget {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(SleuthError::InvalidBudget {
                message: format!("multiplier must be >= 1, got {multiplier}"),
            });
        }
        Ok(Self {
            max_attempts,
            base_delay,
            multiplier,
            cap,
        })
    }

    /// Fixed delay between attempts
    ///
    /// # Errors
    ///
    /// Returns error when `max_attempts < 1`
    pub fn fixed(max_attempts: u32, delay: Duration) -> SleuthResult<Self> {
        Self::new(max_attempts, delay, 1.0, delay)
    }

    /// Single attempt, no waiting
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            cap: Duration::ZERO,
        }
    }

    /// Maximum number of attempts
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Growth factor
    #[must_use]
    pub const fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Upper bound on any single delay
    #[must_use]
    pub const fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay to sleep after attempt `attempt` failed.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs).min(self.cap)
    }

    /// True once `attempt >= max_attempts`
    #[must_use]
    pub const fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Sum of the delays slept between `attempts` attempts
    #[must_use]
    pub fn total_delay(&self, attempts: u32) -> Duration {
        (1..attempts).map(|a| self.delay(a)).sum()
    }
}

/// Serialized form of a budget as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum attempts
    pub max_attempts: u32,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Delay cap in milliseconds
    pub cap_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            multiplier: 2.0,
            cap_ms: 30_000,
        }
    }
}

impl BudgetConfig {
    /// Fixed schedule
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            multiplier: 1.0,
            cap_ms: delay_ms,
        }
    }

    /// Validate into a budget
    ///
    /// # Errors
    ///
    /// Returns error when the values are out of range
    pub fn to_budget(&self) -> SleuthResult<AttemptBudget> {
        AttemptBudget::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            Duration::from_millis(self.cap_ms),
        )
    }
}
