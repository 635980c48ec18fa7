//! Deterministic clock for time-based testing.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use sigil_core::Clock;

/// Controllable clock starting at a fixed instant.
///
/// Tests advance it explicitly, so timestamps and quota windows are
/// reproducible regardless of wall-clock time.
#[derive(Debug)]
pub struct TestClock {
    unix_seconds: AtomicI64,
}

impl Default for TestClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z, arbitrary but stable.
        Self::at(1_704_067_200)
    }
}

impl TestClock {
    /// Creates a clock pinned at the given Unix timestamp.
    pub fn at(unix_seconds: i64) -> Self {
        Self { unix_seconds: AtomicI64::new(unix_seconds) }
    }

    /// Advances the clock.
    pub fn advance(&self, duration: Duration) {
        self.unix_seconds.fetch_add(duration.as_secs() as i64, Ordering::SeqCst);
    }

    /// Current pinned timestamp.
    pub fn current(&self) -> i64 {
        self.unix_seconds.load(Ordering::SeqCst)
    }
}

impl Clock for TestClock {
    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.current().max(0) as u64)
    }
}
