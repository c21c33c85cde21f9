//! `loopwatch simulate`: a ticking event loop that blocks itself on purpose.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use clap::Args;
use loopwatch::{MillisValue, Settings, Ticker};
use rand::Rng;
use serde::Serialize;

use crate::error::CliResult;

const RANDOM_MAX_CONFIG_MS: u64 = 100;
const RANDOM_MAX_BLOCK_MS: u64 = 200;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Heartbeat interval in milliseconds (overrides file and environment)
    #[arg(long)]
    pub interval_ms: Option<f64>,

    /// Stall threshold in milliseconds (overrides file and environment)
    #[arg(long)]
    pub threshold_ms: Option<f64>,

    /// How long each block lasts
    #[arg(long, default_value_t = 300)]
    pub block_ms: u64,

    /// Number of blocks to perform
    #[arg(long, default_value_t = 1)]
    pub episodes: usize,

    /// Recursion depth at which each block happens
    #[arg(long, default_value_t = 0)]
    pub depth: usize,

    /// How long to keep the loop running after a block while waiting for its report
    #[arg(long, default_value_t = 2_000)]
    pub settle_ms: u64,

    /// Subtract half an interval from reported durations
    #[arg(long)]
    pub subtract_half_interval: bool,

    /// Pick interval, threshold and block length at random
    #[arg(long)]
    pub random: bool,

    /// Upper bound on total runtime
    #[arg(long)]
    pub run_ms: Option<u64>,

    /// Print reports as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Config file (defaults to $LOOPWATCH_CONFIG or ~/.loopwatch/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    timestamp: String,
    episode: usize,
    duration_ms: u64,
    stack: Vec<&'a str>,
}

/// The randomized shape used by termination stress runs.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RandomPlan {
    interval_ms: u64,
    threshold_ms: u64,
    block_ms: u64,
}

impl RandomPlan {
    fn pick<R: Rng>(rng: &mut R) -> Self {
        Self {
            interval_ms: rng.gen_range(1..=RANDOM_MAX_CONFIG_MS),
            threshold_ms: rng.gen_range(1..=RANDOM_MAX_CONFIG_MS),
            block_ms: rng.gen_range(0..RANDOM_MAX_BLOCK_MS),
        }
    }
}

pub fn run(mut args: SimulateArgs) -> CliResult<()> {
    let mut settings = Settings::load(args.config.clone())?.with_env_overrides();
    if args.random {
        let plan = RandomPlan::pick(&mut rand::thread_rng());
        tracing::debug!(?plan, "Randomized simulation");
        args.interval_ms = Some(plan.interval_ms as f64);
        args.threshold_ms = Some(plan.threshold_ms as f64);
        args.block_ms = plan.block_ms;
    }
    apply_overrides(&mut settings, &args);

    let reported = Arc::new(AtomicUsize::new(0));
    let json = args.json;
    let counter = Arc::clone(&reported);
    let options = settings.into_options().on_blocked(move |duration_ms, stack| {
        let episode = counter.fetch_add(1, Ordering::AcqRel) + 1;
        print_report(episode, duration_ms, &stack, json);
    });
    loopwatch::install(options)?;

    let config = loopwatch::active_config().unwrap_or_default();
    let mut event_loop = EventLoop {
        ticker: Ticker::new(config.interval()),
        deadline: args.run_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
    };
    let block = Duration::from_millis(args.block_ms);
    let settle = Duration::from_millis(args.settle_ms);

    for episode in 1..=args.episodes {
        // A few healthy turns before each block so the heartbeat is fresh.
        if !event_loop.run_for(config.interval() * 2, || false) {
            break;
        }
        nested_block(args.depth, block);
        let arrived = || reported.load(Ordering::Acquire) >= episode;
        if !event_loop.run_for(settle, arrived) {
            break;
        }
        if !arrived() {
            tracing::info!(episode, "No report for block (below threshold?)");
        }
    }
    Ok(())
}

fn apply_overrides(settings: &mut Settings, args: &SimulateArgs) {
    if let Some(value) = args.interval_ms {
        settings.interval_ms = Some(MillisValue::Number(value));
    }
    if let Some(value) = args.threshold_ms {
        settings.threshold_ms = Some(MillisValue::Number(value));
    }
    if args.subtract_half_interval {
        settings.subtract_half_interval = true;
    }
}

struct EventLoop {
    ticker: Ticker,
    deadline: Option<Instant>,
}

impl EventLoop {
    /// Turns the loop for `duration` or until `done` holds. Returns false
    /// once the overall deadline has passed.
    fn run_for<F: Fn() -> bool>(&mut self, duration: Duration, done: F) -> bool {
        let until = Instant::now() + duration;
        loop {
            self.ticker.poll();
            if self.expired() {
                return false;
            }
            if done() || Instant::now() >= until {
                return true;
            }
            self.ticker.wait(Duration::from_millis(1));
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

fn nested_block(depth: usize, duration: Duration) {
    loopwatch::frame!();
    if depth == 0 {
        return block_sync(duration);
    }
    nested_block(depth - 1, duration);
}

fn block_sync(duration: Duration) {
    loopwatch::frame!();
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

fn print_report(episode: usize, duration_ms: u64, stack: &str, json: bool) {
    if json {
        let report = Report {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            episode,
            duration_ms,
            stack: stack.lines().collect(),
        };
        match serde_json::to_string(&report) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode report"),
        }
    } else {
        println!("blocked for {duration_ms}ms (episode {episode})");
        if !stack.is_empty() {
            println!("{stack}");
        }
    }
}
