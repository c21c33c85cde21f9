//! Heartbeat register shared between the monitored and monitor threads.
//!
//! Heartbeats are a single atomic scalar: nanoseconds since the register's
//! own `Instant` epoch. The monitored thread is the only one recording them
//! and the monitor thread the only one reading them, so neither ever waits on
//! the other.
//!
//! While the monitor considers the thread stalled it arms the register, and
//! the first heartbeat after that is kept separately: later heartbeats move
//! `last_tick` on, but the stall still ends at the first one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct HeartbeatRegister {
    epoch: Instant,
    last_tick_nanos: AtomicU64,
    armed: AtomicBool,
    first_tick_nanos: AtomicU64,
}

const NO_TICK: u64 = u64::MAX;

impl HeartbeatRegister {
    /// Creates a register whose first heartbeat is "now".
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_tick_nanos: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            first_tick_nanos: AtomicU64::new(NO_TICK),
        }
    }

    /// Records the current time as the latest heartbeat.
    pub fn tick(&self) -> Duration {
        let now = self.now();
        self.record(now);
        now
    }

    /// Records `at` unless a later heartbeat is already stored.
    pub(crate) fn record(&self, at: Duration) {
        let nanos = duration_to_nanos(at).min(NO_TICK - 1);
        self.last_tick_nanos.fetch_max(nanos, Ordering::AcqRel);
        if self.armed.load(Ordering::Acquire) {
            let _ = self.first_tick_nanos.compare_exchange(
                NO_TICK,
                nanos,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Starts remembering the next heartbeat. Called by the monitor when it
    /// enters Blocked.
    pub(crate) fn arm(&self) {
        self.first_tick_nanos.store(NO_TICK, Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    /// Stops remembering heartbeats and forgets the one kept, if any.
    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        self.first_tick_nanos.store(NO_TICK, Ordering::Release);
    }

    /// First heartbeat recorded since [`arm`](Self::arm).
    pub(crate) fn first_tick_since_armed(&self) -> Option<Duration> {
        match self.first_tick_nanos.load(Ordering::Acquire) {
            NO_TICK => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Time since the register's epoch.
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn last_tick(&self) -> Duration {
        Duration::from_nanos(self.last_tick_nanos.load(Ordering::Acquire))
    }

    pub fn elapsed_since_tick(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_tick())
    }
}

impl Default for HeartbeatRegister {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_register_starts_at_epoch() {
        let register = HeartbeatRegister::new();
        assert_eq!(register.last_tick(), Duration::ZERO);
    }

    #[test]
    fn test_tick_advances_last_tick() {
        let register = HeartbeatRegister::new();
        std::thread::sleep(Duration::from_millis(2));
        let at = register.tick();
        assert_eq!(register.last_tick(), at);
        assert!(at >= Duration::from_millis(2));
    }

    #[test]
    fn test_timestamp_never_moves_backward() {
        let register = HeartbeatRegister::new();
        register.record(Duration::from_millis(500));
        register.record(Duration::from_millis(200));
        assert_eq!(register.last_tick(), Duration::from_millis(500));
    }

    #[test]
    fn test_armed_register_keeps_first_heartbeat() {
        let register = HeartbeatRegister::new();
        register.record(Duration::from_millis(10));
        assert_eq!(register.first_tick_since_armed(), None);

        register.arm();
        register.record(Duration::from_millis(310));
        register.record(Duration::from_millis(345));
        assert_eq!(
            register.first_tick_since_armed(),
            Some(Duration::from_millis(310))
        );
        assert_eq!(register.last_tick(), Duration::from_millis(345));

        register.disarm();
        register.record(Duration::from_millis(400));
        assert_eq!(register.first_tick_since_armed(), None);
    }

    #[test]
    fn test_elapsed_since_tick_saturates() {
        let register = HeartbeatRegister::new();
        register.record(Duration::from_millis(300));
        assert_eq!(
            register.elapsed_since_tick(Duration::from_millis(450)),
            Duration::from_millis(150)
        );
        assert_eq!(
            register.elapsed_since_tick(Duration::from_millis(100)),
            Duration::ZERO
        );
    }
}
