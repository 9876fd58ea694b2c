//! Time sources.
//!
//! The service never reads the wall clock directly: it asks a [`Clock`] and
//! passes the answer through a [`Ticker`] so that every instant it records is
//! strictly later than the previous one.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.  Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Strictly increasing millisecond timestamps on top of a [`Clock`].
pub(crate) struct Ticker {
    clock: Arc<dyn Clock>,
    last_ms: AtomicI64,
}

impl Ticker {
    /// `floor` is the newest instant already persisted; issued instants never
    /// go behind it even if the wall clock does.
    pub(crate) fn new(clock: Arc<dyn Clock>, floor: Option<DateTime<Utc>>) -> Self {
        Self {
            clock,
            last_ms: AtomicI64::new(floor.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN)),
        }
    }

    pub(crate) fn tick(&self) -> DateTime<Utc> {
        let wall = self.clock.now();
        let wall_ms = wall.timestamp_millis();
        let next = |last: i64| wall_ms.max(last.saturating_add(1));

        let prev = match self
            .last_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(prev) | Err(prev) => prev,
        };
        DateTime::<Utc>::from_timestamp_millis(next(prev)).unwrap_or(wall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_strictly_increasing_on_a_frozen_clock() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let ticker = Ticker::new(clock.clone(), None);

        let a = ticker.tick();
        let b = ticker.tick();
        assert!(b > a);
        assert_eq!(a.timestamp_millis(), start.timestamp_millis());

        clock.advance(Duration::seconds(10));
        let c = ticker.tick();
        assert_eq!(
            c.timestamp_millis(),
            (start + Duration::seconds(10)).timestamp_millis()
        );
    }

    #[test]
    fn ticker_never_goes_behind_floor() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let floor = start + Duration::seconds(30);
        let ticker = Ticker::new(clock, Some(floor));

        assert!(ticker.tick() > floor);
    }
}
