//! The monitor thread: sleep, sample, classify, capture, schedule.
//!
//! The thread owns everything it mutates. Shared with the monitored side are
//! only the heartbeat atomic, the stop flag and the producer end of the
//! delivery channel. It is detached: nobody joins it, and it exits on its own
//! when asked to stop, when the monitored thread is gone, or when the
//! delivery channel has been dropped.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::classifier::{EpisodeClassifier, Observation, ResolvedEpisode};
use crate::config::WatchdogConfig;
use crate::delivery::{DeliveryItem, DeliverySender};
use crate::heartbeat::HeartbeatRegister;
use crate::stack::{ShadowStack, StackCapturer, StackSnapshot, MAX_FRAMES};

pub(crate) const MONITOR_THREAD_NAME: &str = "loopwatch-monitor";

pub(crate) struct Monitor {
    config: WatchdogConfig,
    heartbeat: Arc<HeartbeatRegister>,
    stop: Arc<AtomicBool>,
    host: Weak<ShadowStack>,
    capturer: Box<dyn StackCapturer>,
    sender: DeliverySender,
    classifier: EpisodeClassifier,
}

/// Owned by the monitored side. Dropping it does not stop the thread; call
/// [`MonitorHandle::stop`].
#[derive(Debug)]
pub(crate) struct MonitorHandle {
    thread: Thread,
    join: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Asks the monitor to exit and wakes it. Never waits for it.
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.thread.unpark();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Monitor {
    pub(crate) fn new(
        config: WatchdogConfig,
        heartbeat: Arc<HeartbeatRegister>,
        host: Weak<ShadowStack>,
        capturer: Box<dyn StackCapturer>,
        sender: DeliverySender,
    ) -> Self {
        Self {
            classifier: EpisodeClassifier::new(config.threshold()),
            config,
            heartbeat,
            stop: Arc::new(AtomicBool::new(false)),
            host,
            capturer,
            sender,
        }
    }

    pub(crate) fn spawn(self) -> io::Result<MonitorHandle> {
        let stop = Arc::clone(&self.stop);
        let join = thread::Builder::new()
            .name(MONITOR_THREAD_NAME.to_string())
            .spawn(move || self.run())?;
        Ok(MonitorHandle {
            thread: join.thread().clone(),
            join,
            stop,
        })
    }

    fn run(mut self) {
        let interval = self.config.interval();
        loop {
            thread::park_timeout(interval);
            let now = self.heartbeat.now();
            if !self.step_at(now) {
                break;
            }
        }
        self.classifier.reset();
        self.heartbeat.disarm();
        trace!("Monitor thread exiting");
    }

    /// One monitor wake at monitor time `now`. Returns false when the monitor
    /// should exit.
    fn step_at(&mut self, now: Duration) -> bool {
        if self.stop.load(Ordering::Acquire) || self.host.strong_count() == 0 {
            return false;
        }

        let last_tick = self.heartbeat.last_tick();
        let first_tick = self.heartbeat.first_tick_since_armed();
        match self
            .classifier
            .observe_with_first_tick(now, last_tick, first_tick)
        {
            Observation::Steady => {
                trace!(
                    elapsed_ms = as_millis(now.saturating_sub(last_tick)),
                    "Heartbeat OK"
                );
            }
            Observation::Started { elapsed, .. } => {
                self.heartbeat.arm();
                let stack = self
                    .capturer
                    .capture(MAX_FRAMES)
                    .unwrap_or_else(StackSnapshot::empty);
                warn!(
                    elapsed_ms = as_millis(elapsed),
                    threshold_ms = as_millis(self.config.threshold()),
                    frames = stack.len(),
                    innermost = stack.frames().first().map(|frame| frame.label()).unwrap_or(""),
                    "Monitored thread stalled"
                );
                self.classifier.attach_stack(stack);
            }
            Observation::Ongoing => {}
            Observation::Resolved(resolved) => {
                self.heartbeat.disarm();
                let item = self.delivery_item(resolved);
                debug!(duration_ms = item.duration_ms, "Stall resolved");
                if !self.sender.schedule(item) {
                    return false;
                }
            }
        }
        true
    }

    fn delivery_item(&self, resolved: ResolvedEpisode) -> DeliveryItem {
        let mut duration = resolved.duration;
        if self.config.subtract_half_interval() {
            duration = duration.saturating_sub(self.config.interval() / 2);
        }
        DeliveryItem {
            duration_ms: as_millis(duration),
            stack: resolved
                .episode
                .stack
                .map(|stack| stack.to_text())
                .unwrap_or_default(),
        }
    }
}

pub(crate) fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
