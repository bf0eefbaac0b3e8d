//! Simulated time for the dispatch coordinator.
//!
//! All core components work in integer time units ([SimTime]) and take `now`
//! explicitly. [SimClock] maps wall-clock time onto those units for the async
//! runner and the producers that feed it.

use std::time::Duration;

use tokio::time::Instant;

/// Simulated time, in whole time units.
pub type SimTime = u64;

#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin: Instant,
    offset: SimTime,
    unit: Duration,
}

impl SimClock {
    /// Start a clock at time zero, `unit_ms` wall-clock milliseconds per time unit.
    pub fn start(unit_ms: u64) -> Self {
        Self::resume(unit_ms, 0)
    }

    /// Start a clock that reads `from` right now. Used after a restart so
    /// restored timestamps stay in the past.
    pub fn resume(unit_ms: u64, from: SimTime) -> Self {
        Self {
            origin: Instant::now(),
            offset: from,
            unit: Duration::from_millis(unit_ms.max(1)),
        }
    }

    pub fn now(&self) -> SimTime {
        let elapsed = self.origin.elapsed().as_millis();
        self.offset + (elapsed / self.unit.as_millis()) as SimTime
    }

    /// Wall-clock length of one time unit.
    pub fn unit(&self) -> Duration {
        self.unit
    }

    /// Wall-clock duration of `units` time units.
    pub fn units(&self, units: SimTime) -> Duration {
        self.unit.saturating_mul(units.min(u32::MAX as u64) as u32)
    }
}

/// Decides when the next periodic checkpoint is due.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointTimer {
    interval: SimTime,
    last_fired_at: Option<SimTime>,
}

impl CheckpointTimer {
    pub fn new(interval: SimTime) -> Self {
        Self {
            interval,
            last_fired_at: None,
        }
    }

    /// Returns `true` (and arms the next interval) when a checkpoint is due at `now`.
    /// The first checkpoint fires one full interval after the clock starts.
    pub fn fire_if_due(&mut self, now: SimTime) -> bool {
        let since = self.last_fired_at.unwrap_or(0);
        if now.saturating_sub(since) >= self.interval {
            self.last_fired_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Treat `at` as the last checkpoint, so the next one is a full interval later.
    pub fn rearm(&mut self, at: SimTime) {
        self.last_fired_at = Some(at);
    }

    pub fn last_fired_at(&self) -> Option<SimTime> {
        self.last_fired_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_timer_fires_once_per_interval() {
        let mut timer = CheckpointTimer::new(60);

        assert!(!timer.fire_if_due(0));
        assert!(!timer.fire_if_due(59));
        assert!(timer.fire_if_due(60));
        assert_eq!(timer.last_fired_at(), Some(60));

        assert!(!timer.fire_if_due(100));
        assert!(timer.fire_if_due(125));
        assert_eq!(timer.last_fired_at(), Some(125));
    }

    #[tokio::test(start_paused = true)]
    async fn sim_clock_counts_whole_units() {
        let clock = SimClock::start(100);
        assert_eq!(clock.now(), 0);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now(), 2);

        assert_eq!(clock.units(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_clock_continues_from_offset() {
        let clock = SimClock::resume(10, 500);
        assert_eq!(clock.now(), 500);

        tokio::time::advance(Duration::from_millis(35)).await;
        assert_eq!(clock.now(), 503);
    }

    #[test]
    fn rearmed_timer_waits_a_full_interval() {
        let mut timer = CheckpointTimer::new(60);
        timer.rearm(200);
        assert!(!timer.fire_if_due(210));
        assert!(timer.fire_if_due(260));
    }
}
