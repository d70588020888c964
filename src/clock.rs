//! Wall-clock sources for note timestamps and reminder scheduling.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};

pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;

    /// Current time as epoch milliseconds.
    fn now_millis(&self) -> i64;

    /// Real time left until the local wall-clock time `target`; zero if it has passed.
    fn delay_until(&self, target: NaiveDateTime) -> Duration;
}

/// Place a wall-clock time in `tz`. Times repeated when clocks go back take
/// their first occurrence; times skipped when clocks go forward move past the gap.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&local).earliest().unwrap_or_else(|| {
        tz.from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&local))
    })
}

/// Elapsed time from `now` until the wall-clock time `target` in `tz`.
pub fn delay_in_zone<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>, target: NaiveDateTime) -> Duration {
    let millis = resolve_local(tz, target).timestamp_millis() - now.timestamp_millis();
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

/// The host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_millis(&self) -> i64 {
        Local::now().timestamp_millis()
    }

    fn delay_until(&self, target: NaiveDateTime) -> Duration {
        delay_in_zone(&Local, Utc::now(), target)
    }
}

/// Wall time pinned to `start` and advanced by the tokio clock.
///
/// Under `tokio::time::pause` this moves only when tokio time is advanced,
/// which keeps scheduling deterministic.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    start: NaiveDateTime,
    origin: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            start,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.start + elapsed
    }

    fn now_millis(&self) -> i64 {
        self.now().and_utc().timestamp_millis()
    }

    // Anchored wall time has no zone, so it never jumps.
    fn delay_until(&self, target: NaiveDateTime) -> Duration {
        (target - self.now()).to_std().unwrap_or_default()
    }
}
