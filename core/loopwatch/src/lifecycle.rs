//! Watchdog lifecycle: the process-wide singleton and its engine.
//!
//! ```text
//!  monitored thread                          monitor thread
//!  ────────────────                          ──────────────
//!  start() ─ spawn ───────────────────────►  loop { park(interval); step }
//!  tick()  ─ heartbeat.tick() ─ atomic ───►  observe(now, last_tick)
//!          ◄─ drain() ◄──── channel ◄──────  schedule(item) on resolution
//!  callback(ms, stack)
//! ```
//!
//! Starting is guarded by an atomic flag: the first successful `start` owns
//! the process for its lifetime and later calls return `false`. There is no
//! stop operation. The monitor thread is detached and exits by itself when
//! the thread that started it goes away.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, ThreadId};

use tracing::{debug, info};

use crate::config::{Callback, Options, WatchdogConfig};
use crate::delivery::{self, DeliveryReceiver};
use crate::error::{Result, WatchdogError};
use crate::heartbeat::HeartbeatRegister;
use crate::monitor::{as_millis, Monitor, MonitorHandle};
use crate::stack::{ShadowStack, ShadowStackCapturer, StackCapturer};

static STARTED: AtomicBool = AtomicBool::new(false);
static WATCHDOG: OnceCell<Watchdog> = OnceCell::new();

/// Starts the process-wide watchdog, monitoring the calling thread.
///
/// Returns `Ok(false)` without side effects if a watchdog is already running
/// in this process. The callback runs on the calling thread, from [`tick`].
pub fn start<F>(config: WatchdogConfig, callback: F) -> Result<bool>
where
    F: FnMut(u64, String) + Send + 'static,
{
    start_with_capturer(
        config,
        Box::new(callback),
        Box::new(ShadowStackCapturer::current_thread()),
    )
}

/// Like [`start`], with a custom stack capturer.
pub fn start_with_capturer(
    config: WatchdogConfig,
    callback: Callback,
    capturer: Box<dyn StackCapturer>,
) -> Result<bool> {
    if STARTED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!("Watchdog already running; start ignored");
        return Ok(false);
    }

    match Watchdog::spawn(config, callback, capturer) {
        Ok(watchdog) => {
            if !publish(&WATCHDOG, &STARTED, watchdog) {
                return Ok(false);
            }
            info!(
                interval_ms = as_millis(config.interval()),
                threshold_ms = as_millis(config.threshold()),
                "Watchdog started"
            );
            Ok(true)
        }
        Err(err) => {
            STARTED.store(false, Ordering::Release);
            Err(err)
        }
    }
}

/// Stores `watchdog` in `slot`. If the slot is already taken the new watchdog
/// is dropped, which stops its monitor, and `started` is released.
fn publish(slot: &OnceCell<Watchdog>, started: &AtomicBool, watchdog: Watchdog) -> bool {
    match slot.set(watchdog) {
        Ok(()) => true,
        Err(rejected) => {
            drop(rejected);
            started.store(false, Ordering::Release);
            debug!("Watchdog slot already filled; start ignored");
            false
        }
    }
}

/// Validates `options` and starts the watchdog on the calling thread.
///
/// Unlike [`start`], an already running watchdog is an error here.
pub fn install(options: Options) -> Result<()> {
    let (config, callback) = options.validate()?;
    let capturer = Box::new(ShadowStackCapturer::current_thread());
    if !start_with_capturer(config, callback, capturer)? {
        return Err(WatchdogError::AlreadyRunning);
    }
    Ok(())
}

/// Records a heartbeat and delivers pending reports.
///
/// Must be called from the monitored thread every `interval`; calls from
/// other threads, or before [`start`], do nothing.
pub fn tick() {
    if let Some(watchdog) = WATCHDOG.get() {
        watchdog.tick();
    }
}

/// True while the process-wide watchdog's monitor thread is alive.
pub fn is_running() -> bool {
    WATCHDOG
        .get()
        .map(|watchdog| !watchdog.monitor.is_finished())
        .unwrap_or(false)
}

/// The active watchdog's configuration.
pub fn active_config() -> Option<WatchdogConfig> {
    WATCHDOG.get().map(|watchdog| watchdog.config)
}

struct Consumer {
    receiver: DeliveryReceiver,
    callback: Callback,
}

/// One monitored thread plus its monitor.
pub(crate) struct Watchdog {
    config: WatchdogConfig,
    owner: ThreadId,
    heartbeat: Arc<HeartbeatRegister>,
    consumer: Mutex<Consumer>,
    monitor: MonitorHandle,
}

impl Watchdog {
    /// Spawns a monitor for the calling thread.
    pub(crate) fn spawn(
        config: WatchdogConfig,
        callback: Callback,
        capturer: Box<dyn StackCapturer>,
    ) -> Result<Self> {
        let heartbeat = Arc::new(HeartbeatRegister::new());
        let (sender, receiver) = delivery::channel();
        let host = Arc::downgrade(&ShadowStack::current());
        let monitor = Monitor::new(config, Arc::clone(&heartbeat), host, capturer, sender)
            .spawn()
            .map_err(|source| WatchdogError::Spawn { source })?;

        Ok(Self {
            config,
            owner: thread::current().id(),
            heartbeat,
            consumer: Mutex::new(Consumer { receiver, callback }),
            monitor,
        })
    }

    /// Heartbeat, then deliver. Returns the number of reports delivered.
    pub(crate) fn tick(&self) -> usize {
        if thread::current().id() != self.owner {
            debug!("tick() called off the monitored thread; ignored");
            return 0;
        }
        self.heartbeat.tick();
        self.drain()
    }

    fn drain(&self) -> usize {
        // A callback that ticks re-enters here while the lock is held.
        let mut consumer = match self.consumer.try_lock() {
            Ok(consumer) => consumer,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return 0,
        };
        let Consumer { receiver, callback } = &mut *consumer;
        receiver.drain(|item| callback(item.duration_ms, item.stack))
    }

    #[cfg(test)]
    pub(crate) fn monitor_finished(&self) -> bool {
        self.monitor.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{StackSnapshot, MAX_FRAMES};
    use rand::Rng;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    type Reports = Arc<Mutex<Vec<(u64, String)>>>;

    fn recording() -> (Reports, Callback) {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let callback: Callback = Box::new(move |ms, stack| {
            sink.lock().expect("reports").push((ms, stack));
        });
        (reports, callback)
    }

    fn spawn_watchdog(interval_ms: f64, threshold_ms: f64) -> (Watchdog, Reports) {
        let config = WatchdogConfig::from_millis(interval_ms, threshold_ms).expect("config");
        let (reports, callback) = recording();
        let watchdog = Watchdog::spawn(
            config,
            callback,
            Box::new(ShadowStackCapturer::current_thread()),
        )
        .expect("spawn");
        (watchdog, reports)
    }

    fn block_sync(duration: Duration) {
        crate::frame!();
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    fn nested_block(depth: usize, duration: Duration) {
        crate::frame!();
        if depth > 0 {
            return nested_block(depth - 1, duration);
        }
        block_sync(duration);
    }

    /// Ticks like a healthy event loop until `want` reports arrived or
    /// `limit` elapsed.
    fn pump(watchdog: &Watchdog, reports: &Reports, want: usize, limit: Duration) {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            watchdog.tick();
            if reports.lock().expect("reports").len() >= want {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_block_is_reported_once_with_stack() {
        let (watchdog, reports) = spawn_watchdog(50.0, 100.0);
        watchdog.tick();
        block_sync(Duration::from_millis(300));
        pump(&watchdog, &reports, 1, Duration::from_secs(2));
        // Extra healthy ticks must not produce duplicates.
        pump(&watchdog, &reports, 2, Duration::from_millis(200));

        let reports = reports.lock().expect("reports");
        assert_eq!(reports.len(), 1);
        let (duration_ms, stack) = &reports[0];
        assert!(*duration_ms >= 300, "duration {duration_ms}");
        assert!(stack.starts_with("    at block_sync ("), "stack {stack}");
    }

    #[test]
    fn test_block_below_threshold_is_silent() {
        let (watchdog, reports) = spawn_watchdog(10.0, 200.0);
        for _ in 0..3 {
            watchdog.tick();
            block_sync(Duration::from_millis(40));
            watchdog.tick();
        }
        pump(&watchdog, &reports, 1, Duration::from_millis(300));
        assert!(reports.lock().expect("reports").is_empty());
    }

    #[test]
    fn test_each_episode_is_reported_separately() {
        let (watchdog, reports) = spawn_watchdog(5.0, 100.0);
        for round in 1..=3 {
            watchdog.tick();
            block_sync(Duration::from_millis(250));
            pump(&watchdog, &reports, round, Duration::from_secs(2));
        }
        pump(&watchdog, &reports, 4, Duration::from_millis(150));

        let reports = reports.lock().expect("reports");
        assert_eq!(reports.len(), 3);
        for (duration_ms, stack) in reports.iter() {
            assert!(*duration_ms >= 250);
            assert!(stack.contains("block_sync"));
        }
    }

    #[test]
    fn test_deep_stacks_are_capped() {
        let (watchdog, reports) = spawn_watchdog(20.0, 60.0);
        watchdog.tick();
        nested_block(64, Duration::from_millis(200));
        pump(&watchdog, &reports, 1, Duration::from_secs(2));

        let reports = reports.lock().expect("reports");
        assert_eq!(reports.len(), 1);
        let lines: Vec<&str> = reports[0].1.lines().collect();
        assert_eq!(lines.len(), MAX_FRAMES);
        assert!(lines[0].starts_with("    at block_sync ("));
        assert!(lines[1..].iter().all(|line| line.starts_with("    at nested_block (")));
    }

    #[test]
    fn test_tick_from_foreign_thread_is_ignored() {
        let (watchdog, reports) = spawn_watchdog(10.0, 50.0);
        let watchdog = Arc::new(watchdog);
        let before = watchdog.heartbeat.last_tick();
        let remote = Arc::clone(&watchdog);
        let delivered = thread::spawn(move || remote.tick()).join().expect("thread");
        assert_eq!(delivered, 0);
        assert_eq!(watchdog.heartbeat.last_tick(), before);
        assert!(reports.lock().expect("reports").is_empty());
    }

    #[test]
    fn test_reentrant_tick_from_callback_does_not_deadlock() {
        let config = WatchdogConfig::from_millis(10.0, 50.0).expect("config");
        let slot: Arc<OnceCell<Arc<Watchdog>>> = Arc::new(OnceCell::new());
        let count = Arc::new(Mutex::new(0usize));
        let callback: Callback = {
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            Box::new(move |_, _| {
                *count.lock().expect("count") += 1;
                if let Some(watchdog) = slot.get() {
                    watchdog.tick();
                }
            })
        };
        let watchdog = Arc::new(
            Watchdog::spawn(
                config,
                callback,
                Box::new(ShadowStackCapturer::current_thread()),
            )
            .expect("spawn"),
        );
        let _ = slot.set(Arc::clone(&watchdog));

        watchdog.tick();
        block_sync(Duration::from_millis(150));
        let delivered = wait_until(Duration::from_secs(2), || {
            watchdog.tick();
            *count.lock().expect("count") > 0
        });
        assert!(delivered);
    }

    #[test]
    fn test_capture_failure_reports_empty_stack() {
        let config = WatchdogConfig::from_millis(10.0, 50.0).expect("config");
        let (reports, callback) = recording();
        let capturer: Box<dyn StackCapturer> =
            Box::new(|_: usize| -> Option<StackSnapshot> { None });
        let watchdog = Watchdog::spawn(config, callback, capturer).expect("spawn");

        watchdog.tick();
        block_sync(Duration::from_millis(150));
        pump(&watchdog, &reports, 1, Duration::from_secs(2));

        let reports = reports.lock().expect("reports");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, "");
    }

    #[test]
    fn test_publish_into_filled_slot_is_refused() {
        let slot = OnceCell::new();
        let started = AtomicBool::new(true);
        let (first, _first_reports) = spawn_watchdog(10.0, 50.0);
        assert!(publish(&slot, &started, first));
        assert!(started.load(Ordering::Acquire));

        let (second, _second_reports) = spawn_watchdog(10.0, 50.0);
        assert!(!publish(&slot, &started, second));
        assert!(!started.load(Ordering::Acquire));

        let kept = slot.get().expect("first watchdog kept");
        thread::sleep(Duration::from_millis(30));
        assert!(!kept.monitor_finished());
    }

    #[test]
    fn test_stop_wakes_monitor_without_waiting_for_interval() {
        let (watchdog, _reports) = spawn_watchdog(10_000.0, 20_000.0);
        watchdog.monitor.stop();
        assert!(wait_until(Duration::from_secs(2), || watchdog
            .monitor_finished()));
    }

    #[test]
    fn test_monitor_exits_when_host_thread_ends() {
        let (tx, rx) = mpsc::channel();
        let host = thread::spawn(move || {
            let (watchdog, _reports) = spawn_watchdog(5.0, 50.0);
            // Leak the watchdog so only the host thread's exit can stop it.
            let watchdog: &'static Watchdog = Box::leak(Box::new(watchdog));
            tx.send(watchdog).expect("send");
        });
        host.join().expect("host");
        let watchdog = rx.recv().expect("watchdog");
        assert!(wait_until(Duration::from_secs(2), || watchdog
            .monitor_finished()));
    }

    #[test]
    fn test_abrupt_host_termination_under_load() {
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            let mut hosts = Vec::new();
            for _ in 0..4 {
                let interval = rng.gen_range(1..=100) as f64;
                let threshold = rng.gen_range(1..=100) as f64;
                let block = Duration::from_millis(rng.gen_range(0..200));
                let lifetime = Duration::from_millis(rng.gen_range(0..300));
                let (tx, rx) = mpsc::channel();
                hosts.push((
                    thread::spawn(move || {
                        let (watchdog, _reports) = spawn_watchdog(interval, threshold);
                        let watchdog: &'static Watchdog = Box::leak(Box::new(watchdog));
                        tx.send(watchdog).expect("send");
                        let started = Instant::now();
                        watchdog.tick();
                        block_sync(block.min(lifetime));
                        while started.elapsed() < lifetime {
                            watchdog.tick();
                            thread::sleep(Duration::from_millis(1));
                        }
                    }),
                    rx,
                ));
            }

            for (host, rx) in hosts {
                let watchdog = rx.recv().expect("watchdog");
                host.join().expect("host thread must not panic");
                assert!(
                    wait_until(Duration::from_secs(2), || watchdog.monitor_finished()),
                    "monitor outlived its host"
                );
            }
        }
    }
}
