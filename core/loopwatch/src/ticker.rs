//! A repeating heartbeat timer for hand-written event loops.
//!
//! Call [`Ticker::poll`] every time the loop comes around; it ticks the
//! watchdog whenever at least one interval has passed since the last tick.
//! Like an unreferenced host timer it never keeps the loop alive on its own:
//! [`Ticker::wait`] only sleeps until the next tick is due.

use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next_due: Instant,
}

impl Ticker {
    /// First tick is due immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks the process-wide watchdog if due. Returns true if it ticked.
    pub fn poll(&mut self) -> bool {
        self.poll_with(crate::tick)
    }

    /// Runs `on_tick` if due.
    pub fn poll_with<F: FnOnce()>(&mut self, on_tick: F) -> bool {
        let now = Instant::now();
        if now < self.next_due {
            return false;
        }
        on_tick();
        // Missed periods are skipped rather than replayed.
        self.next_due = now + self.interval;
        true
    }

    pub fn time_until_due(&self) -> Duration {
        self.next_due.saturating_duration_since(Instant::now())
    }

    /// Sleeps until the next tick is due, but no longer than `limit`.
    pub fn wait(&self, limit: Duration) {
        let pause = self.time_until_due().min(limit);
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_poll_ticks_immediately() {
        let mut ticker = Ticker::new(Duration::from_secs(60));
        let mut ticks = 0;
        assert!(ticker.poll_with(|| ticks += 1));
        assert!(!ticker.poll_with(|| ticks += 1));
        assert_eq!(ticks, 1);
    }

    #[test]
    fn test_ticks_again_after_interval() {
        let mut ticker = Ticker::new(Duration::from_millis(10));
        assert!(ticker.poll_with(|| {}));
        ticker.wait(Duration::from_secs(1));
        assert!(ticker.poll_with(|| {}));
    }

    #[test]
    fn test_missed_periods_collapse_into_one_tick() {
        let mut ticker = Ticker::new(Duration::from_millis(5));
        ticker.poll_with(|| {});
        thread::sleep(Duration::from_millis(30));
        assert!(ticker.poll_with(|| {}));
        assert!(!ticker.poll_with(|| {}));
        assert!(ticker.time_until_due() <= Duration::from_millis(5));
    }

    #[test]
    fn test_wait_respects_limit() {
        let mut ticker = Ticker::new(Duration::from_secs(60));
        ticker.poll_with(|| {});
        let started = Instant::now();
        ticker.wait(Duration::from_millis(10));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_poll_without_watchdog_is_harmless() {
        let mut ticker = Ticker::new(Duration::from_millis(1));
        assert!(ticker.poll());
    }
}
