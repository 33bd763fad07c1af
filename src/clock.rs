//! Injectable wall-clock abstraction for `track_program_date_time`.
//! `chrono::Utc::now()` is reached for directly elsewhere in this codebase
//! wherever an event gets stamped (webhook/session timestamps); this wraps
//! that one call behind a trait so segmenter tests can pin the clock instead
//! of racing real time.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock: plain `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed-or-stepped clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct FixedClock {
    current: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Arc::new(std::sync::Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.current.lock().expect("clock mutex poisoned");
        *guard += duration;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances_explicitly() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(6));
    }
}
