//! Wall-clock aligned periodic scheduling
//!
//! A small, dependency-free helper for the pacing contract described for
//! `UdpPinger::run` callers: wake on a wall-clock aligned tick rather than
//! drifting relative to process start. This mirrors how the topology
//! refresh and result-flush timers compute their next run time from the
//! current wall clock and sleep to it.

use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

/// Rounds `now` up to the next multiple of `period` since the Unix epoch.
///
/// `tick_k = ceil(now / period) * period`. If `now` already falls exactly
/// on a boundary, the *next* boundary is returned, so a caller computing
/// `align_to_period(now, period) - now` always gets a strictly positive
/// sleep duration.
pub fn align_to_period(now: Duration, period: Duration) -> Duration {
    assert!(period.as_nanos() > 0, "period must be positive");
    let now_ns = now.as_nanos();
    let period_ns = period.as_nanos();
    let next_tick = (now_ns / period_ns + 1) * period_ns;
    Duration::from_nanos(next_tick as u64)
}

/// Drives a caller through a sequence of wall-clock aligned wakeups.
///
/// Each call to [`PeriodicTrigger::sleep_until_next_tick`] blocks until the
/// next aligned boundary and returns, letting the caller run one sweep
/// before calling it again.
#[derive(Debug)]
pub struct PeriodicTrigger {
    period: Duration,
}

impl PeriodicTrigger {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Computes how long to sleep until the next aligned tick, as of now.
    pub fn time_until_next_tick(&self) -> Result<Duration, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let next = align_to_period(now, self.period);
        Ok(next.saturating_sub(now))
    }

    /// Blocks the calling thread until the next aligned tick.
    pub fn sleep_until_next_tick(&self) -> Result<(), SystemTimeError> {
        std::thread::sleep(self.time_until_next_tick()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_up_to_next_boundary() {
        let now = Duration::from_secs(61);
        let period = Duration::from_secs(60);
        assert_eq!(align_to_period(now, period), Duration::from_secs(120));
    }

    #[test]
    fn on_exact_boundary_advances_to_next() {
        let now = Duration::from_secs(120);
        let period = Duration::from_secs(60);
        assert_eq!(align_to_period(now, period), Duration::from_secs(180));
    }

    #[test]
    fn trigger_reports_positive_remaining_time() {
        let trigger = PeriodicTrigger::new(Duration::from_secs(10));
        let remaining = trigger.time_until_next_tick().unwrap();
        assert!(remaining <= Duration::from_secs(10));
    }
}
