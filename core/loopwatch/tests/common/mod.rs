//! Helpers shared by the integration tests. Each test file runs in its own
//! process, so each may install the process-wide watchdog once.

#![allow(dead_code)]

use loopwatch::Ticker;
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type Reports = Arc<Mutex<Vec<(u64, String)>>>;

pub fn reports() -> Reports {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorder(reports: &Reports) -> impl FnMut(u64, String) + Send + 'static {
    let sink = Arc::clone(reports);
    move |duration_ms, stack| sink.lock().expect("reports").push((duration_ms, stack))
}

pub fn count(reports: &Reports) -> usize {
    reports.lock().expect("reports").len()
}

pub fn block_sync(duration: Duration) {
    loopwatch::frame!();
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// Runs the event loop until `want` reports arrived or `limit` elapsed.
pub fn run_loop(ticker: &mut Ticker, reports: &Reports, want: usize, limit: Duration) {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline && count(reports) < want {
        ticker.poll();
        ticker.wait(Duration::from_millis(2));
    }
}

pub fn stack_line(label: &str) -> Regex {
    Regex::new(&format!(r"^    at {} \(.*:\d+:\d+\)$", regex::escape(label))).expect("regex")
}
