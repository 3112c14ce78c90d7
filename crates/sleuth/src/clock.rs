//! Injected time source.
//!
//! Every wait in Sleuth goes through a [`Clock`]. Production code uses
//! [`SystemClock`]; tests use [`FakeClock`], whose `sleep` advances the fake
//! time instantly so timing properties are checked without real delays.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of wall-clock time and the single sanctioned blocking point.
pub trait Clock: Send + Sync + Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Block the current thread for `duration`
    fn sleep(&self, duration: Duration);

    /// Time elapsed since `start`, zero if the clock went backwards
    fn since(&self, start: DateTime<Utc>) -> Duration {
        (self.now() - start).to_std().unwrap_or_default()
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Serialize a [`Duration`] as whole milliseconds
pub(crate) mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fake clock for deterministic testing
///
/// Time only moves when `sleep` or `fast_forward` is called. Clones share the
/// same underlying time.
#[derive(Debug, Clone)]
pub struct FakeClock {
    current_ms: Arc<AtomicU64>,
    slept_ms: Arc<AtomicU64>,
}

impl FakeClock {
    /// Create a fake clock starting at `start_ms` milliseconds since the epoch
    #[must_use]
    pub fn at_ms(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start_ms)),
            slept_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a fake clock starting at `start`
    #[must_use]
    pub fn at(start: DateTime<Utc>) -> Self {
        Self::at_ms(u64::try_from(start.timestamp_millis()).unwrap_or(0))
    }

    /// Create a fake clock at 2024-01-01T00:00:00Z
    #[must_use]
    pub fn new() -> Self {
        Self::at_ms(1_704_067_200_000)
    }

    /// Shared handle to this clock
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }

    /// Current fake time in milliseconds
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Fast-forward time by duration
    pub fn fast_forward(&self, duration: Duration) {
        self.current_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fast-forward time by milliseconds
    pub fn fast_forward_ms(&self, ms: u64) {
        self.fast_forward(Duration::from_millis(ms));
    }

    /// Total time spent in `sleep`
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        Duration::from_millis(self.slept_ms.load(Ordering::SeqCst))
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.slept_ms.fetch_add(ms, Ordering::SeqCst);
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }
}
