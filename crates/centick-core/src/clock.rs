//! Injectable wall-clock so TTL and recovery-window behavior is
//! deterministic under test.

use std::sync::Mutex;
use std::time::Duration;

use crate::UtcDateTime;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Manually-advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<UtcDateTime>,
}

impl ManualClock {
    pub fn starting_at(now: UtcDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock not poisoned");
        *now = *now + by;
    }

    pub fn set(&self, to: UtcDateTime) {
        let mut now = self.now.lock().expect("manual clock lock not poisoned");
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().expect("manual clock lock not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock =
            ManualClock::starting_at(UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid"));
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now().format_rfc3339(), "2024-01-01T00:01:30Z");
    }
}
