//! Logging setup.
//!
//! Events go to stderr by default. When `LOOPWATCH_LOG_DIR` is set they go to
//! a daily rolling file in that directory instead; the returned guard must
//! live until exit so buffered lines are flushed.

use std::env;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "LOOPWATCH_DEBUG_LOG";
const LOG_DIR_ENV: &str = "LOOPWATCH_LOG_DIR";
const LOG_FILE_PREFIX: &str = "loopwatch.log";

pub fn init() -> Option<WorkerGuard> {
    let filter = env_filter(env::var(DEBUG_ENV).ok().as_deref());

    match log_dir() {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
            installed.ok().map(|_| guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

fn env_filter(debug_value: Option<&str>) -> EnvFilter {
    if debug_enabled(debug_value) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn log_dir() -> Option<PathBuf> {
    env::var_os(LOG_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
