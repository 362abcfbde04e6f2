//! Injectable time source.
//!
//! Bucket refills and staleness cutoffs are all driven through this trait so
//! tests can pin time instead of sleeping through real intervals.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync + 'static {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;

    /// Wall-clock time for persisted timestamps and staleness math.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock.
///
/// Monotonic time comes from `tokio::time::Instant` so that tests running
/// under a paused runtime see the same virtual time the sleeps do.
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic unit tests.
pub struct ManualClock {
    ms: Mutex<u64>,
    base: DateTime<Utc>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            ms: Mutex::new(0),
            base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    pub fn advance_ms(&self, delta: u64) {
        *self.ms.lock() += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.ms.lock()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.base + ChronoDuration::milliseconds(*self.ms.lock() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_views() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ms(), 0);

        clock.advance_ms(1_500);
        assert_eq!(clock.now_ms(), 1_500);
        assert_eq!((clock.now_utc() - clock.base).num_milliseconds(), 1_500);
    }
}
