//! # loopwatch
//!
//! Event-loop stall detector. The monitored thread ticks a heartbeat every
//! `interval`; a background monitor thread notices when no tick has arrived
//! for longer than `threshold`, captures the monitored thread's call stack at
//! that moment, and once the thread recovers delivers
//! `(duration_ms, stack)` to a callback on the monitored thread itself.
//!
//! ## Design Principles
//!
//! - **Never block the monitored thread**: the heartbeat is one atomic store,
//!   stack capture only uses `try_lock`, and reports travel over a channel.
//! - **One watchdog per process**: a second `start` returns `false`.
//! - **No stop operation**: the monitor thread is detached and exits when the
//!   monitored thread goes away.
//! - **Cooperative stacks**: functions opt into stack reports with
//!   [`frame!`]; see [`stack`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use loopwatch::{Options, Ticker};
//!
//! loopwatch::install(
//!     Options::new()
//!         .threshold_ms(100)
//!         .on_blocked(|ms, stack| eprintln!("blocked for {ms}ms\n{stack}")),
//! )?;
//!
//! let mut ticker = Ticker::new(std::time::Duration::from_millis(50));
//! loop {
//!     ticker.poll();
//!     // ... run one turn of the event loop ...
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
mod monitor;
pub mod stack;
pub mod ticker;

pub use classifier::{Episode, EpisodeClassifier, Observation, ResolvedEpisode};
pub use config::{
    default_config_path, Callback, MillisValue, Options, Settings, WatchdogConfig,
    DEFAULT_INTERVAL_MS, DEFAULT_THRESHOLD_MS,
};
pub use error::{ConfigError, ConfigField, Result, ValueProblem, WatchdogError};
pub use heartbeat::HeartbeatRegister;
pub use lifecycle::{active_config, install, is_running, start, start_with_capturer, tick};
pub use stack::{
    enter, Frame, FrameGuard, ShadowStackCapturer, StackCapturer, StackSnapshot, MAX_FRAMES,
};
pub use ticker::Ticker;
