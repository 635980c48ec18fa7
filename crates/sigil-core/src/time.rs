//! Clock abstraction for testable timestamping.
//!
//! Issuance timestamps and quota windows read time through this trait so
//! tests can inject a controllable source. Production code uses
//! [`SystemClock`].

use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Time source for issuance and batching.
pub trait Clock: Send + Sync {
    /// Current system time.
    fn now_system(&self) -> SystemTime;

    /// Current time as a UTC datetime.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Current time as whole seconds since the Unix epoch.
    ///
    /// This is the `ts` member of the canonical payload.
    fn unix_seconds(&self) -> i64 {
        self.now_utc().timestamp()
    }
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}
